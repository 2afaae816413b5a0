//! # Gateway Configuration
//!
//! Layered the same way as the other servers in this workspace:
//!
//! 1. built-in defaults,
//! 2. a JSON config file (`notify_gateway.conf`, or `--config-path`),
//! 3. environment variables and command-line arguments (via `clap`).
//!
//! Each layer overrides only the fields it sets.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::broker::{BrokerSettings, DEFAULT_AMQP_URL, DEFAULT_PREFETCH, NOTIFY_QUEUE};
use crate::client::OUTBOUND_CAPACITY;

const DEFAULT_CONFIG_FILE: &str = "notify_gateway.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(about = "Real-time notification gateway", version)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[clap(long, env = "NOTIFY_PORT", help = "Port to listen on for HTTP and WebSocket clients.")]
    pub port: Option<u16>,

    #[clap(long, env = "NOTIFY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "AMQP_URL", help = "RabbitMQ connection URL.")]
    pub amqp_url: Option<String>,

    #[clap(long, env = "NOTIFY_QUEUE", help = "Name of the durable notification queue.")]
    pub queue_name: Option<String>,

    #[clap(long, env = "NOTIFY_PREFETCH", help = "Maximum unacknowledged deliveries from the broker.")]
    pub prefetch: Option<u16>,

    #[clap(long, env = "NOTIFY_OUTBOUND_CAPACITY", help = "Per-connection outbound queue size before eviction.")]
    pub outbound_capacity: Option<usize>,

    #[clap(long, env = "NOTIFY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "NOTIFY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "NOTIFY_IDENTITY_HEADER", help = "Request header carrying the authenticated user id.")]
    pub identity_header: Option<String>,

    #[clap(long, env = "NOTIFY_ALLOW_LEGACY_IDENTITY", help = "Accept a user_id path/query parameter when no authenticated user is present.")]
    pub allow_legacy_identity: Option<bool>,
}

impl GatewayConfig {
    // Merge two configs, where 'other' overrides 'self' for Some values
    fn merge(self, other: GatewayConfig) -> GatewayConfig {
        GatewayConfig {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            amqp_url: other.amqp_url.or(self.amqp_url),
            queue_name: other.queue_name.or(self.queue_name),
            prefetch: other.prefetch.or(self.prefetch),
            outbound_capacity: other.outbound_capacity.or(self.outbound_capacity),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            identity_header: other.identity_header.or(self.identity_header),
            allow_legacy_identity: other.allow_legacy_identity.or(self.allow_legacy_identity),
        }
    }

    fn defaults() -> GatewayConfig {
        GatewayConfig {
            port: Some(8080),
            config_path: None,
            amqp_url: Some(DEFAULT_AMQP_URL.to_string()),
            queue_name: Some(NOTIFY_QUEUE.to_string()),
            prefetch: Some(DEFAULT_PREFETCH),
            outbound_capacity: Some(OUTBOUND_CAPACITY),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            identity_header: Some("x-user-id".to_string()),
            allow_legacy_identity: Some(true),
        }
    }
}

/// Fully defaulted configuration used by the gateway binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub port: u16,
    pub amqp_url: String,
    pub queue_name: String,
    pub prefetch: u16,
    pub outbound_capacity: usize,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub identity_header: String,
    pub allow_legacy_identity: bool,
}

impl ResolvedConfig {
    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            url: self.amqp_url.clone(),
            queue_name: self.queue_name.clone(),
            prefetch: self.prefetch,
        }
    }
}

impl From<GatewayConfig> for ResolvedConfig {
    fn from(config: GatewayConfig) -> Self {
        let defaults = GatewayConfig::defaults();
        let config = defaults.merge(config);
        ResolvedConfig {
            port: config.port.unwrap_or(8080),
            amqp_url: config.amqp_url.unwrap_or_else(|| DEFAULT_AMQP_URL.to_string()),
            queue_name: config.queue_name.unwrap_or_else(|| NOTIFY_QUEUE.to_string()),
            prefetch: config.prefetch.unwrap_or(DEFAULT_PREFETCH).max(1),
            outbound_capacity: config.outbound_capacity.unwrap_or(OUTBOUND_CAPACITY).max(1),
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            identity_header: config.identity_header.unwrap_or_else(|| "x-user-id".to_string()),
            allow_legacy_identity: config.allow_legacy_identity.unwrap_or(true),
        }
    }
}

/// Parses the command line (and environment) and layers it over the file
/// config and the defaults.
pub fn load_config() -> ResolvedConfig {
    load_config_with(GatewayConfig::parse())
}

pub fn load_config_with(cli: GatewayConfig) -> ResolvedConfig {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = GatewayConfig::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }

    ResolvedConfig::from(current_config.merge(cli))
}

fn read_config_file(path: &Path) -> Option<GatewayConfig> {
    if !path.exists() {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        );
        return None;
    }

    let config_str = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str::<GatewayConfig>(&config_str) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let resolved = ResolvedConfig::from(GatewayConfig::default());
        assert_eq!(resolved.port, 8080);
        assert_eq!(resolved.queue_name, "notify.q");
        assert_eq!(resolved.prefetch, 10);
        assert_eq!(resolved.outbound_capacity, 256);
        assert_eq!(resolved.identity_header, "x-user-id");
        assert!(resolved.allow_legacy_identity);
    }

    #[test]
    fn cli_overrides_file_which_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.conf");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{"port": 9000, "queueName": "file.q", "prefetch": 3}}"#).unwrap();

        let cli = GatewayConfig {
            config_path: Some(path),
            prefetch: Some(20),
            ..Default::default()
        };
        let resolved = load_config_with(cli);
        assert_eq!(resolved.port, 9000);
        assert_eq!(resolved.queue_name, "file.q");
        assert_eq!(resolved.prefetch, 20);

        let broker = resolved.broker_settings();
        assert_eq!(broker.queue_name, "file.q");
        assert_eq!(broker.prefetch, 20);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        fs::write(&path, "{ not json").unwrap();

        let resolved = load_config_with(GatewayConfig {
            config_path: Some(path),
            ..Default::default()
        });
        assert_eq!(resolved.port, 8080);
    }

    #[test]
    fn cli_flags_parse() {
        let parsed = GatewayConfig::try_parse_from([
            "notify_gateway",
            "--port",
            "7000",
            "--allow-legacy-identity",
            "false",
        ])
        .unwrap();
        assert_eq!(parsed.port, Some(7000));
        assert_eq!(parsed.allow_legacy_identity, Some(false));
    }
}
