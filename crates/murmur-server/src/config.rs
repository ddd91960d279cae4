//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - A TOML file (`MURMUR_CONFIG`, or the first of the default paths found)
//! - Environment variables (`MURMUR_PORT`, `MURMUR_LIMITS__MAX_CONNECTIONS`, ...)

use anyhow::{Context, Result};
use murmur_core::RouterConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Paths searched when `MURMUR_CONFIG` is unset.
const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "murmur.toml",
    "/etc/murmur/murmur.toml",
    "~/.config/murmur/murmur.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Routing behavior.
    #[serde(default)]
    pub router: RoutingConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum display name length in bytes.
    #[serde(default = "default_max_identity_length")]
    pub max_identity_length: usize,

    /// Maximum chat message length in bytes.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval clients should ping at, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Idle time after which a silent connection is closed, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Accept the `sender` field of chat events as given. When disabled the
    /// identity the connection registered with is used.
    #[serde(default = "default_true")]
    pub trust_client_sender: bool,

    /// Per-subscriber buffer of each topic and private queue.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_identity_length() -> usize {
    murmur_core::message::DEFAULT_MAX_IDENTITY_LENGTH
}

fn default_max_content_length() -> usize {
    murmur_core::router::DEFAULT_MAX_CONTENT_LENGTH
}

fn default_heartbeat_interval() -> u64 {
    25_000 // 25 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_channel_capacity() -> usize {
    murmur_core::channel::DEFAULT_CHANNEL_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            router: RoutingConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            max_identity_length: default_max_identity_length(),
            max_content_length: default_max_content_length(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            trust_client_sender: true,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from the config file (if any) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = match std::env::var("MURMUR_CONFIG") {
            Ok(path) => Some(PathBuf::from(shellexpand::tilde(&path).as_ref())),
            Err(_) => find_config_file(),
        };

        Self::from_sources(path.as_deref(), environment())
    }

    /// Load configuration from a specific file, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_sources(Some(path.as_ref()), environment())
    }

    fn from_sources(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(env)
            .build()
            .with_context(|| match path {
                Some(path) => format!("Failed to load config file: {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Router settings derived from this configuration.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            trust_client_sender: self.router.trust_client_sender,
            max_identity_length: self.limits.max_identity_length,
            max_content_length: self.limits.max_content_length,
        }
    }
}

/// Environment overrides: `MURMUR_PORT`, `MURMUR_LIMITS__MAX_CONNECTIONS`, ...
fn environment() -> config::Environment {
    config::Environment::with_prefix("MURMUR")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn find_config_file() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(source))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert!(config.router.trust_client_sender);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 50000

            [router]
            trust_client_sender = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert!(!config.router_config().trust_client_sender);
    }

    #[test]
    fn test_empty_sources_give_defaults() {
        let config = Config::from_sources(None, env_from(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.heartbeat.timeout_ms, 60_000);
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::from_sources(
            None,
            env_from(&[
                ("MURMUR_PORT", "9100"),
                ("MURMUR_LIMITS__MAX_CONNECTIONS", "7"),
                ("MURMUR_ROUTER__TRUST_CLIENT_SENDER", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.limits.max_connections, 7);
        assert!(!config.router.trust_client_sender);
    }

    #[test]
    fn test_file_then_environment() {
        let path = std::env::temp_dir().join(format!("murmur-test-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 9200\n[heartbeat]\ntimeout_ms = 5000\n").unwrap();

        let env = env_from(&[("MURMUR_PORT", "9300")]);
        let config = Config::from_sources(Some(path.as_path()), env).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.port, 9300);
        assert_eq!(config.heartbeat.timeout_ms, 5000);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = Config::from_sources(
            Some(Path::new("/nonexistent/murmur.toml")),
            env_from(&[]),
        );
        assert!(result.is_err());
    }
}
