use clap::Parser;
use client::{Client, LogInterface};
use log::info;
use shared::config::{ClientConfig, StartupVariables};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Startup variables as --KEY=value (CA_HOST, CA_PORT, PQ_EMAIL, ...)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    vars: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let vars = StartupVariables::from_process(args.vars);
    let config = ClientConfig::from_vars(&vars)?;

    info!("Starting client...");
    info!("Client Agent: {}:{}", config.ca_host, config.ca_port);

    let mut client = Client::new(config, Box::new(LogInterface))?;
    client.run().await?;

    Ok(())
}
