use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use retro_db::messages::{DEFAULT_MAX_MESSAGE_LEN, MessagePolicy};
use retro_poll::{DEFAULT_POLL_INTERVAL, PollConfig};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RETRO_JWT_SECRET is unset or still a placeholder")]
    MissingSecret,

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub max_message_len: usize,
    pub allow_self_messages: bool,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("RETRO_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::MissingSecret);
        }

        let poll_interval_ms = parse(&lookup, "RETRO_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL.as_millis() as u64)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "RETRO_POLL_INTERVAL_MS",
                value: "0".into(),
            });
        }

        Ok(Self {
            host: lookup("RETRO_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&lookup, "RETRO_PORT", 3000)?,
            db_path: lookup("RETRO_DB_PATH").unwrap_or_else(|| "retrofagia.db".into()).into(),
            jwt_secret,
            max_message_len: parse(&lookup, "RETRO_MAX_MESSAGE_LEN", DEFAULT_MAX_MESSAGE_LEN)?,
            allow_self_messages: parse_flag(&lookup, "RETRO_ALLOW_SELF_MESSAGES", true)?,
            poll_interval: Duration::from_millis(poll_interval_ms),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::Invalid { name: "RETRO_HOST", value: raw })
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            policy: MessagePolicy {
                max_len: self.max_message_len,
                allow_self: self.allow_self_messages,
            },
        }
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn parse_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = lookup(name) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { name, value }),
    }
}
