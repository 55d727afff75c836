//! Configuration management for the sandbox host.
//!
//! This module handles loading, validation, and conversion of host
//! configuration from TOML files and command-line arguments.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use webcontrol_server::ServerConfig;

fn default_idle_timeout() -> u64 {
    15
}

fn default_pipeline_limit() -> usize {
    8
}

fn default_io_threads() -> usize {
    1
}

fn default_max_request_bytes() -> usize {
    16 * 1024
}

fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web control server settings
    pub server: ServerSettings,
    /// Sandbox host settings
    #[serde(default)]
    pub host: HostSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Network and session settings handed to the web control server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "0.0.0.0:8082")
    pub bind_address: String,
    /// Static document directory; defaults to `wdata` next to the binary
    #[serde(default)]
    pub doc_root: Option<String>,
    /// Keepalive/idle interval in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Maximum number of unsent HTTP responses per connection
    #[serde(default = "default_pipeline_limit")]
    pub pipeline_limit: usize,
    /// Background I/O threads (0 for one per CPU core)
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,
    /// Largest accepted HTTP request header block in bytes
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

/// Settings of the simulated host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Host tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Player names reported to clients
    #[serde(default)]
    pub players: Vec<String>,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8082".to_string(),
            doc_root: None,
            idle_timeout_secs: default_idle_timeout(),
            pipeline_limit: default_pipeline_limit(),
            io_threads: default_io_threads(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            players: vec!["Alpha".to_string(), "Bravo".to_string()],
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            std::fs::write(path, toml_content)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to a web control server configuration.
    pub fn to_server_config(&self) -> anyhow::Result<ServerConfig> {
        let defaults = ServerConfig::default();
        Ok(ServerConfig {
            bind_address: self
                .server
                .bind_address
                .parse()
                .with_context(|| format!("invalid bind address '{}'", self.server.bind_address))?,
            doc_root: self
                .server
                .doc_root
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or(defaults.doc_root),
            idle_timeout: Duration::from_secs(self.server.idle_timeout_secs),
            pipeline_limit: self.server.pipeline_limit,
            io_threads: self.server.io_threads,
            max_request_bytes: self.server.max_request_bytes,
        })
    }

    /// Host tick interval as a duration.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.host.tick_interval_ms)
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if self.server.idle_timeout_secs == 0 {
            return Err("idle_timeout_secs must be greater than zero".to_string());
        }
        if self.server.pipeline_limit == 0 {
            return Err("pipeline_limit must be greater than zero".to_string());
        }
        if self.server.max_request_bytes == 0 {
            return Err("max_request_bytes must be greater than zero".to_string());
        }
        if self.host.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than zero".to_string());
        }
        if let Some(doc_root) = &self.server.doc_root {
            if doc_root.is_empty() {
                return Err("doc_root cannot be empty".to_string());
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_address, "0.0.0.0:8082");
        assert!(config.server.doc_root.is_none());
        assert_eq!(config.server.idle_timeout_secs, 15);
        assert_eq!(config.server.pipeline_limit, 8);
        assert_eq!(config.server.io_threads, 1);
        assert_eq!(config.host.tick_interval_ms, 50);
        assert_eq!(config.host.players, vec!["Alpha", "Bravo"]);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_nonexistent_file_creates_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webcontrol.toml");

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8082");
        assert!(path.exists());

        // The written file loads back to the same settings
        let reloaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(reloaded.server.bind_address, config.server.bind_address);
        assert_eq!(reloaded.host.players, config.host.players);
    }

    #[test]
    fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
bind_address = "127.0.0.1:9000"
doc_root = "/srv/console"
idle_timeout_secs = 30
pipeline_limit = 4
io_threads = 0

[host]
tick_interval_ms = 16
players = ["Nova"]

[logging]
level = "debug"
json_format = true
"#;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, toml_content).unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.server.doc_root.as_deref(), Some("/srv/console"));
        assert_eq!(config.server.idle_timeout_secs, 30);
        assert_eq!(config.server.pipeline_limit, 4);
        assert_eq!(config.server.io_threads, 0);
        assert_eq!(config.server.max_request_bytes, 16 * 1024);
        assert_eq!(config.host.tick_interval_ms, 16);
        assert_eq!(config.host.players, vec!["Nova"]);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[server\nbind_address = ").unwrap();

        assert!(AppConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn test_serde_deserialization_with_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
[server]
bind_address = "127.0.0.1:8082"
"#,
        )
        .unwrap();

        assert_eq!(config.server.idle_timeout_secs, 15);
        assert_eq!(config.server.pipeline_limit, 8);
        assert_eq!(config.host.tick_interval_ms, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_to_server_config_conversion() {
        let mut config = AppConfig::default();
        config.server.bind_address = "192.168.1.100:8082".to_string();
        config.server.doc_root = Some("/srv/console".to_string());
        config.server.idle_timeout_secs = 5;
        config.server.pipeline_limit = 2;

        let server_config = config.to_server_config().unwrap();
        assert_eq!(server_config.bind_address.to_string(), "192.168.1.100:8082");
        assert_eq!(server_config.doc_root, PathBuf::from("/srv/console"));
        assert_eq!(server_config.idle_timeout, Duration::from_secs(5));
        assert_eq!(server_config.pipeline_limit, 2);
        assert_eq!(server_config.io_threads, 1);
    }

    #[test]
    fn test_to_server_config_default_doc_root() {
        let server_config = AppConfig::default().to_server_config().unwrap();
        assert!(server_config.doc_root.ends_with("wdata"));
    }

    #[test]
    fn test_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid_address".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().contains("Invalid bind address"));
        assert!(config.to_server_config().is_err());
    }

    #[test]
    fn test_validation_zero_values() {
        let mut config = AppConfig::default();
        config.server.idle_timeout_secs = 0;
        assert!(config.validate().unwrap_err().contains("idle_timeout_secs"));

        let mut config = AppConfig::default();
        config.server.pipeline_limit = 0;
        assert!(config.validate().unwrap_err().contains("pipeline_limit"));

        let mut config = AppConfig::default();
        config.host.tick_interval_ms = 0;
        assert!(config.validate().unwrap_err().contains("tick_interval_ms"));

        let mut config = AppConfig::default();
        config.server.doc_root = Some(String::new());
        assert!(config.validate().unwrap_err().contains("doc_root"));
    }

    #[test]
    fn test_validation_log_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Level '{}' should be valid", level);
        }

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));
    }
}
