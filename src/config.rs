//! Configuration management for shell-relay.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::ServerConfig;
use crate::cli::Args;
use crate::mux::MuxSettings;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Remote shell settings.
    pub remote: RemoteSection,
    /// Local terminal settings.
    pub local: LocalSection,
    /// Upload settings.
    pub upload: UploadSection,
    /// Servers offered to clients.
    pub servers: Vec<ServerEntry>,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            graceful_shutdown: true,
        }
    }
}

/// Remote shell section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    /// Bound on login and on opening the shell, in seconds.
    pub connect_timeout_secs: u64,
    /// Terminal type requested for remote shells.
    pub term: String,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            term: "xterm-256color".to_string(),
        }
    }
}

/// Local terminal section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSection {
    /// Shell override. Unset uses the platform default.
    pub shell: Option<String>,
}

/// Upload section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    /// Where uploads wait before transfer.
    pub staging_dir: PathBuf,
    /// Largest accepted request body.
    pub max_file_bytes: usize,
    /// Remote directory used when the client names none.
    pub default_remote_dir: String,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("uploads"),
            max_file_bytes: 512 * 1024 * 1024,
            default_remote_dir: "~/".to_string(),
        }
    }
}

/// A server offered to clients. Carries no credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
}

fn default_ssh_port() -> u16 {
    22
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Unparsable numbers are ignored.
    pub fn apply_env_with<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("SHELL_RELAY_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("SHELL_RELAY_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Some(secs) = var("SHELL_RELAY_CONNECT_TIMEOUT") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    self.remote.connect_timeout_secs = secs;
                }
            }
        }

        if let Some(shell) = var("SHELL_RELAY_SHELL") {
            if !shell.trim().is_empty() {
                self.local.shell = Some(shell);
            }
        }

        if let Some(dir) = var("SHELL_RELAY_STAGING_DIR") {
            if !dir.is_empty() {
                self.upload.staging_dir = PathBuf::from(dir);
            }
        }

        if let Some(level) = var("SHELL_RELAY_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(ref shell) = args.shell {
            self.local.shell = Some(shell.clone());
        }
        if let Some(secs) = args.connect_timeout {
            self.remote.connect_timeout_secs = secs;
        }
        if let Some(ref dir) = args.staging_dir {
            self.upload.staging_dir = dir.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Config::default();

        // Load from config file if specified
        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        // Apply environment variable overrides
        config.apply_env();

        // Apply CLI argument overrides (highest priority)
        config.apply_args(args);

        Ok(config)
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port);
        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }

        Ok(server_config)
    }

    /// Multiplexer settings derived from the remote and local sections.
    pub fn to_mux_settings(&self) -> Result<MuxSettings, ConfigError> {
        if self.remote.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "remote.connect_timeout_secs",
                "0".to_string(),
            ));
        }

        Ok(MuxSettings {
            connect_timeout: self.connect_timeout(),
            term: self.remote.term.clone(),
            local_shell: self.local.shell.clone(),
            ..MuxSettings::default()
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.connect_timeout_secs)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
    /// A setting has an unusable value.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
            Self::InvalidValue(key, value) => write!(f, "invalid value for {}: {}", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3001);
        assert!(config.server.graceful_shutdown);
        assert_eq!(config.remote.connect_timeout_secs, 30);
        assert_eq!(config.upload.staging_dir, PathBuf::from("uploads"));
        assert_eq!(config.upload.default_remote_dir, "~/");
        assert!(config.local.shell.is_none());
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "server": {
                "host": "0.0.0.0",
                "port": 8080
            },
            "remote": {
                "connect_timeout_secs": 5
            },
            "servers": [
                {"id": "1", "name": "Web", "host": "10.0.0.5", "username": "deploy"}
            ]
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.remote.connect_timeout_secs, 5);
        assert_eq!(config.remote.term, "xterm-256color");
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].port, 22);
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{
            "server": {
                "port": 9000
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1"); // Default
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_apply_env() {
        let mut config = Config::default();
        config.apply_env_with(env(&[
            ("SHELL_RELAY_HOST", "0.0.0.0"),
            ("SHELL_RELAY_PORT", "4000"),
            ("SHELL_RELAY_CONNECT_TIMEOUT", "12"),
            ("SHELL_RELAY_SHELL", "/bin/bash"),
            ("SHELL_RELAY_STAGING_DIR", "/var/tmp/relay"),
            ("RUST_LOG", "debug"),
        ]));

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.remote.connect_timeout_secs, 12);
        assert_eq!(config.local.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(config.upload.staging_dir, PathBuf::from("/var/tmp/relay"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_apply_env_ignores_garbage() {
        let mut config = Config::default();
        config.apply_env_with(env(&[
            ("SHELL_RELAY_PORT", "many"),
            ("SHELL_RELAY_CONNECT_TIMEOUT", "0"),
            ("SHELL_RELAY_LOG_LEVEL", "warn"),
            ("RUST_LOG", "trace"),
        ]));

        assert_eq!(config.server.port, 3001);
        assert_eq!(config.remote.connect_timeout_secs, 30);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        let args = Args {
            host: Some("192.168.1.1".parse().unwrap()),
            port: Some(5000),
            shell: Some("/bin/zsh".to_string()),
            connect_timeout: Some(9),
            ..Args::default()
        };

        config.apply_args(&args);

        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.local.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.connect_timeout(), Duration::from_secs(9));
    }

    #[test]
    fn test_unset_args_keep_config() {
        let mut config = Config::default();
        config.server.port = 7000;
        config.apply_args(&Args::default());
        assert_eq!(config.server.port, 7000);
    }

    #[test]
    fn test_to_server_config() {
        let config = Config::default();
        let server_config = config.to_server_config().unwrap();

        assert_eq!(server_config.host, "127.0.0.1");
        assert_eq!(server_config.port, 3001);
        assert!(server_config.graceful_shutdown);
    }

    #[test]
    fn test_invalid_host() {
        let mut config = Config::default();
        config.server.host = "not-an-ip".to_string();

        let result = config.to_server_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_to_mux_settings() {
        let mut config = Config::default();
        config.local.shell = Some("/bin/sh".to_string());
        let settings = config.to_mux_settings().unwrap();
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.local_shell.as_deref(), Some("/bin/sh"));

        config.remote.connect_timeout_secs = 0;
        assert!(config.to_mux_settings().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"host\""));
        assert!(json.contains("\"port\""));
        assert!(json.contains("\"staging_dir\""));
    }
}
