pub mod admin;
pub mod balancing;
pub mod backend_channel;
pub mod client_channel;
pub mod probe;
pub mod protocol;
pub mod registry;
pub mod server;

use chrono::Utc;
use registry::Mode;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Shared fallible-task return type: task boundaries (`server::run`, `main`)
/// propagate with `?`; individual connection handlers catch their own
/// errors and log instead of bubbling them up.
pub type AsyncResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("can't parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Per-connection failures on the backend or client channel. Task boundaries
/// (`server::run`) see these boxed into `AsyncResult`; the accept loops log
/// them per-connection and keep running.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reading from or writing to the admin console's stdin/stdout.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("admin console io failed: {0}")]
    Io(#[from] std::io::Error),
}

fn default_client_addr() -> String {
    "0.0.0.0:11114".to_string()
}

fn default_backend_addr() -> String {
    "0.0.0.0:11115".to_string()
}

fn default_ping_interval_ms() -> u64 {
    1000
}

fn default_mode() -> Mode {
    Mode::Static
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_client_addr")]
    pub client_addr: String,
    #[serde(default = "default_backend_addr")]
    pub backend_addr: String,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_mode")]
    pub default_mode: Mode,
    #[serde(default)]
    pub max_per_backend: Option<u32>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            client_addr: default_client_addr(),
            backend_addr: default_backend_addr(),
            ping_interval_ms: default_ping_interval_ms(),
            default_mode: default_mode(),
            max_per_backend: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Config, ConfigError> {
        let f = std::fs::File::open(path)?;
        let config: Config = serde_yaml::from_reader(f)?;
        Ok(config)
    }
}

// Mode needs to round-trip through YAML as a lowercase string, matching the
// wire representation used by the admin console and the client handshake.
impl Serialize for Mode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D>(deserializer: D) -> Result<Mode, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Mode::from_str(&s).map_err(|_| serde::de::Error::custom(format!("invalid mode '{}'", s)))
    }
}

pub fn init_logging() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init()
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_roundtrips_through_yaml() {
        let yaml = "static";
        let mode: Mode = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(mode, Mode::Static);
        assert_eq!(serde_yaml::to_string(&mode).unwrap().trim(), "static");
    }

    #[test]
    fn config_defaults_when_fields_absent() {
        let yaml = "client_addr: 127.0.0.1:1\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend_addr, default_backend_addr());
        assert_eq!(config.ping_interval_ms, 1000);
        assert_eq!(config.default_mode, Mode::Static);
        assert_eq!(config.max_per_backend, None);
    }
}
