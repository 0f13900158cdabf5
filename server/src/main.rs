use clap::{Parser, Subcommand};
use log::info;
use server::{EventSink, InternalServer, NullSink, PlayFabSink};
use shared::config::{InternalConfig, ServerRole, StartupVariables};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run an AI process hosting one shard
    Ai {
        /// Startup variables as --KEY=value
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        vars: Vec<String>,
    },
    /// Run the UberDOG process hosting the global managers
    Uberdog {
        /// Startup variables as --KEY=value
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        vars: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let (role, vars) = match args.role {
        Role::Ai { vars } => (ServerRole::Ai, vars),
        Role::Uberdog { vars } => (ServerRole::UberDog, vars),
    };

    let vars = StartupVariables::from_process(vars);
    let config = InternalConfig::from_vars(role, &vars)?;

    info!("Starting {} process...", role.name());
    if role == ServerRole::Ai {
        info!("Shard name: {}", config.shard_name);
    }

    let events: Box<dyn EventSink> =
        match (&config.playfab_title_id, &config.playfab_secret_key) {
            (Some(title_id), Some(secret_key)) => {
                info!("Forwarding server events to PlayFab title {}", title_id);
                Box::new(PlayFabSink::new(title_id, secret_key))
            }
            _ => Box::new(NullSink),
        };

    let server = InternalServer::connect(&config, events).await?;
    server.run().await?;

    info!("{} process stopped", role.name());
    Ok(())
}
