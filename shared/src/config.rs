//! Startup variables and the typed configuration built from them.
//!
//! Every key is looked up in the process environment first (so container
//! deployments can inject values), then in `--KEY=value` command-line
//! arguments, and finally falls back to a default.

use crate::channel::ChannelId;
use crate::constants::{
    AI_DEFAULT_CHANNEL, DATABASE_SERVER_DEFAULT_CHANNEL, STATE_SERVER_DEFAULT_CHANNEL,
    UBERDOG_DEFAULT_CHANNEL,
};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ASTRON_PORT: u16 = 7199;
pub const DEFAULT_CA_PORT: u16 = 6667;
pub const DEFAULT_SHARD_NAME: &str = "Hacker Valley";
pub const DEFAULT_ACCOUNTS: &str = "guest:guest";

#[derive(Debug, Clone, Default)]
pub struct StartupVariables {
    env: HashMap<String, String>,
    args: HashMap<String, String>,
}

impl StartupVariables {
    /// Builds from explicit environment pairs and raw command-line words.
    /// Words that are not `--KEY=value` are ignored.
    pub fn new<E, A, S>(env: E, args: A) -> Self
    where
        E: IntoIterator<Item = (String, String)>,
        A: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = args
            .into_iter()
            .filter_map(|arg| {
                let arg = arg.as_ref().strip_prefix("--")?;
                let (key, value) = arg.split_once('=')?;
                Some((key.to_string(), value.to_string()))
            })
            .collect();

        Self {
            env: env.into_iter().collect(),
            args,
        }
    }

    /// Reads the real process environment.
    pub fn from_process<A, S>(args: A) -> Self
    where
        A: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(std::env::vars(), args)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .or_else(|| self.args.get(key))
            .map(String::as_str)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    /// Reads an optional hexadecimal `u32`, with or without a `0x` prefix.
    pub fn hex_u32(&self, key: &str) -> Result<Option<u32>, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };

        let digits = value.trim();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);
        u32::from_str_radix(digits, 16)
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Splits `host:port`, using `default_port` when no port is given.
pub fn parse_address(key: &str, value: &str, default_port: u16) -> Result<(String, u16), ConfigError> {
    match value.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key: key.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((value.to_string(), default_port)),
    }
}

fn parse_accounts(value: &str) -> Result<Vec<(String, String)>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once(':')
                .map(|(email, password)| (email.to_string(), password.to_string()))
                .ok_or_else(|| ConfigError::Invalid {
                    key: "ACCOUNTS".to_string(),
                    value: entry.to_string(),
                    reason: "expected email:password".to_string(),
                })
        })
        .collect()
}

/// Which internal process is being configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Ai,
    UberDog,
}

impl ServerRole {
    pub fn name(&self) -> &'static str {
        match self {
            ServerRole::Ai => "AI",
            ServerRole::UberDog => "UberDOG",
        }
    }
}

/// Configuration of an AI or UberDOG process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalConfig {
    pub role: ServerRole,
    pub base_channel: ChannelId,
    pub state_server_channel: ChannelId,
    pub database_server_channel: ChannelId,
    pub shard_name: String,
    pub astron_host: String,
    pub astron_port: u16,
    pub playfab_title_id: Option<String>,
    pub playfab_secret_key: Option<String>,
    pub accounts: Vec<(String, String)>,
}

impl InternalConfig {
    pub fn from_vars(role: ServerRole, vars: &StartupVariables) -> Result<Self, ConfigError> {
        let base_channel = match role {
            ServerRole::Ai => vars.parse_or("AI_SHARD_CHANNEL", AI_DEFAULT_CHANNEL)?,
            ServerRole::UberDog => UBERDOG_DEFAULT_CHANNEL,
        };

        let (astron_host, astron_port) = parse_address(
            "ASTRON_IP",
            &vars.get_or("ASTRON_IP", "127.0.0.1"),
            DEFAULT_ASTRON_PORT,
        )?;

        Ok(Self {
            role,
            base_channel,
            state_server_channel: vars
                .parse_or("STATE_SERVER_CHANNEL", STATE_SERVER_DEFAULT_CHANNEL)?,
            database_server_channel: vars
                .parse_or("DATABASE_SERVER_CHANNEL", DATABASE_SERVER_DEFAULT_CHANNEL)?,
            shard_name: vars.get_or("SHARD_NAME", DEFAULT_SHARD_NAME),
            astron_host,
            astron_port,
            playfab_title_id: vars.get("PLAYFAB_TITLE_ID").map(str::to_string),
            playfab_secret_key: vars.get("PLAYFAB_SECRET_KEY").map(str::to_string),
            accounts: parse_accounts(&vars.get_or("ACCOUNTS", DEFAULT_ACCOUNTS))?,
        })
    }
}

/// What the client does once a connection failure is dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Terminal,
    Retry { attempts: u32, delay: Duration },
}

/// Configuration of a game client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub ca_host: String,
    pub ca_port: u16,
    pub email: Option<String>,
    pub password: Option<String>,
    pub manual_dc_hash: Option<u32>,
    pub failure_policy: FailurePolicy,
}

impl ClientConfig {
    pub fn from_vars(vars: &StartupVariables) -> Result<Self, ConfigError> {
        let attempts: u32 = vars.parse_or("CONNECTION_RETRIES", 0)?;
        let delay_ms: u64 = vars.parse_or("RETRY_DELAY_MS", 2000)?;
        let failure_policy = if attempts == 0 {
            FailurePolicy::Terminal
        } else {
            FailurePolicy::Retry {
                attempts,
                delay: Duration::from_millis(delay_ms),
            }
        };

        Ok(Self {
            ca_host: vars.get_or("CA_HOST", "127.0.0.1"),
            ca_port: vars.parse_or("CA_PORT", DEFAULT_CA_PORT)?,
            email: vars.get("PQ_EMAIL").map(str::to_string),
            password: vars.get("PQ_PASSWORD").map(str::to_string),
            manual_dc_hash: vars.hex_u32("MANUAL_DC_HASH")?,
            failure_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(env: &[(&str, &str)], args: &[&str]) -> StartupVariables {
        StartupVariables::new(
            env.iter().map(|(k, v)| (k.to_string(), v.to_string())),
            args.iter(),
        )
    }

    #[test]
    fn test_environment_wins_over_arguments() {
        let vars = vars(&[("SHARD_NAME", "Env Valley")], &["--SHARD_NAME=Arg Valley"]);
        assert_eq!(vars.get("SHARD_NAME"), Some("Env Valley"));
    }

    #[test]
    fn test_arguments_then_default() {
        let vars = vars(&[], &["--CA_PORT=7000", "positional", "--broken"]);
        assert_eq!(vars.get("CA_PORT"), Some("7000"));
        assert_eq!(vars.get_or("CA_HOST", "127.0.0.1"), "127.0.0.1");
        assert_eq!(vars.get("broken"), None);
    }

    #[test]
    fn test_bad_number_is_config_error() {
        let vars = vars(&[("STATE_SERVER_CHANNEL", "lots")], &[]);
        let result = InternalConfig::from_vars(ServerRole::Ai, &vars);
        assert!(matches!(result, Err(ConfigError::Invalid { ref key, .. }) if key == "STATE_SERVER_CHANNEL"));
    }

    #[test]
    fn test_internal_defaults() {
        let config = InternalConfig::from_vars(ServerRole::Ai, &vars(&[], &[])).unwrap();
        assert_eq!(config.base_channel, AI_DEFAULT_CHANNEL);
        assert_eq!(config.state_server_channel, STATE_SERVER_DEFAULT_CHANNEL);
        assert_eq!(config.database_server_channel, DATABASE_SERVER_DEFAULT_CHANNEL);
        assert_eq!(config.astron_host, "127.0.0.1");
        assert_eq!(config.astron_port, DEFAULT_ASTRON_PORT);
        assert_eq!(config.accounts, vec![("guest".to_string(), "guest".to_string())]);

        let config = InternalConfig::from_vars(ServerRole::UberDog, &vars(&[], &[])).unwrap();
        assert_eq!(config.base_channel, UBERDOG_DEFAULT_CHANNEL);
    }

    #[test]
    fn test_astron_address_split() {
        let vars = vars(&[("ASTRON_IP", "10.0.0.5:7100")], &[]);
        let config = InternalConfig::from_vars(ServerRole::Ai, &vars).unwrap();
        assert_eq!(config.astron_host, "10.0.0.5");
        assert_eq!(config.astron_port, 7100);
    }

    #[test]
    fn test_client_config() {
        let vars = vars(
            &[("PQ_EMAIL", "guest")],
            &["--PQ_PASSWORD=guest", "--MANUAL_DC_HASH=0xdeadbeef", "--CONNECTION_RETRIES=3"],
        );
        let config = ClientConfig::from_vars(&vars).unwrap();
        assert_eq!(config.ca_port, DEFAULT_CA_PORT);
        assert_eq!(config.email.as_deref(), Some("guest"));
        assert_eq!(config.password.as_deref(), Some("guest"));
        assert_eq!(config.manual_dc_hash, Some(0xDEAD_BEEF));
        assert_eq!(
            config.failure_policy,
            FailurePolicy::Retry {
                attempts: 3,
                delay: Duration::from_millis(2000)
            }
        );
    }

    #[test]
    fn test_client_defaults_to_terminal_policy() {
        let config = ClientConfig::from_vars(&vars(&[], &[])).unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Terminal);
        assert_eq!(config.manual_dc_hash, None);
        assert_eq!(config.email, None);
    }

    #[test]
    fn test_bad_accounts_entry() {
        let vars = vars(&[("ACCOUNTS", "guest:guest,nobody")], &[]);
        assert!(InternalConfig::from_vars(ServerRole::UberDog, &vars).is_err());
    }
}
