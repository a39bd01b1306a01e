use clap::Parser;
use rlb::registry::{Mode, Registry};
use rlb::{server, Config};
use std::sync::Arc;

const DEFAULT_CONF_PATH: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(name = "rlb", about = "TCP load balancer for the rlb wire protocol")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = DEFAULT_CONF_PATH)]
    config: String,

    /// Override: address the client channel listens on
    #[arg(long)]
    client_addr: Option<String>,

    /// Override: address the backend channel listens on
    #[arg(long)]
    backend_addr: Option<String>,

    /// Override: probe interval in ms (clamped to >=200)
    #[arg(long)]
    ping_ms: Option<u64>,

    /// Override: default selection mode
    #[arg(long)]
    mode: Option<String>,

    /// Override: per-backend live-client cap
    #[arg(long)]
    max_per_backend: Option<u32>,
}

/// Applies CLI overrides on top of the loaded file config, field by field.
/// A flag left unset on the command line leaves the file's value in place.
fn apply_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(addr) = &cli.client_addr {
        config.client_addr = addr.clone();
    }
    if let Some(addr) = &cli.backend_addr {
        config.backend_addr = addr.clone();
    }
    if let Some(ms) = cli.ping_ms {
        config.ping_interval_ms = ms;
    }
    if let Some(mode) = cli.mode.as_deref() {
        config.default_mode = mode.parse::<Mode>().unwrap_or(config.default_mode);
    }
    if let Some(max) = cli.max_per_backend {
        config.max_per_backend = Some(max);
    }
    config
}

#[tokio::main]
pub async fn main() -> rlb::AsyncResult<()> {
    rlb::init_logging().expect("can't enable logging");
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config).expect("can't load config file");
    let config = apply_overrides(config, &cli);

    let registry = Arc::new(Registry::new());
    registry.policy.set_ping_interval_ms(config.ping_interval_ms);
    registry.policy.set_default_mode(config.default_mode);
    registry.policy.set_max_per_backend(config.max_per_backend);

    server::run(&config.client_addr, &config.backend_addr, registry).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_overrides() -> Cli {
        Cli {
            config: DEFAULT_CONF_PATH.to_string(),
            client_addr: None,
            backend_addr: None,
            ping_ms: None,
            mode: None,
            max_per_backend: None,
        }
    }

    #[test]
    fn cli_override_wins_over_file_value() {
        let file_config = Config {
            client_addr: "0.0.0.0:11114".to_string(),
            ..Config::default()
        };
        let cli = Cli {
            client_addr: Some("127.0.0.1:9999".to_string()),
            ..no_overrides()
        };
        let merged = apply_overrides(file_config, &cli);
        assert_eq!(merged.client_addr, "127.0.0.1:9999");
    }

    #[test]
    fn absent_cli_flags_keep_file_values() {
        let file_config = Config {
            backend_addr: "0.0.0.0:22222".to_string(),
            ping_interval_ms: 500,
            ..Config::default()
        };
        let merged = apply_overrides(file_config.clone(), &no_overrides());
        assert_eq!(merged, file_config);
    }

    #[test]
    fn mode_override_parses_case_insensitively() {
        let cli = Cli {
            mode: Some("DYNAMIC".to_string()),
            ..no_overrides()
        };
        let merged = apply_overrides(Config::default(), &cli);
        assert_eq!(merged.default_mode, Mode::Dynamic);
    }

    #[test]
    fn invalid_mode_override_falls_back_to_file_value() {
        let file_config = Config {
            default_mode: Mode::Dynamic,
            ..Config::default()
        };
        let cli = Cli {
            mode: Some("bogus".to_string()),
            ..no_overrides()
        };
        let merged = apply_overrides(file_config, &cli);
        assert_eq!(merged.default_mode, Mode::Dynamic);
    }
}
