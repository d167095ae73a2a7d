use crate::session::RemoteTarget;
use crate::utils::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound for the `*_timeout_seconds` settings (one day).
pub const MAX_TIMEOUT_SECONDS: u64 = 86_400;
/// Upper bound for `pool.idle_timeout_minutes` (one week).
pub const MAX_IDLE_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_thread_size")]
    pub thread_size: usize,
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64, // 0 disables the idle reaper
    #[serde(default = "default_borrow_timeout_seconds")]
    pub borrow_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_auth_timeout_seconds")]
    pub auth_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "pretty"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_telemetry_max_events")]
    pub max_events: usize,
    #[serde(default = "default_telemetry_retention_hours")]
    pub retention_hours: u64,
}

// Default values
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    "transfer".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_thread_size() -> usize {
    8
}

fn default_idle_timeout_minutes() -> u64 {
    30
}

fn default_borrow_timeout_seconds() -> u64 {
    5
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

fn default_auth_timeout_seconds() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_telemetry_max_events() -> usize {
    256
}

fn default_telemetry_retention_hours() -> u64 {
    24
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: String::new(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            thread_size: default_thread_size(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            borrow_timeout_seconds: default_borrow_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            auth_timeout_seconds: default_auth_timeout_seconds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            max_events: default_telemetry_max_events(),
            retention_hours: default_telemetry_retention_hours(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            pool: PoolSettings::default(),
            logging: LoggingConfig::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl RemoteConfig {
    /// Endpoint and credentials in the form the session provider consumes.
    pub fn target(&self) -> RemoteTarget {
        RemoteTarget::new(&self.host, self.port, &self.username, &self.password)
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PoolError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| PoolError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            return Err(PoolError::Config("remote.host cannot be empty".to_string()));
        }

        if self.remote.username.trim().is_empty() {
            return Err(PoolError::Config(
                "remote.username cannot be empty".to_string(),
            ));
        }

        if self.pool.pool_size == 0 {
            return Err(PoolError::Config(
                "pool.pool_size must be at least 1".to_string(),
            ));
        }

        if self.pool.thread_size == 0 {
            return Err(PoolError::Config(
                "pool.thread_size must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("borrow_timeout_seconds", self.pool.borrow_timeout_seconds),
            ("connect_timeout_seconds", self.pool.connect_timeout_seconds),
            ("auth_timeout_seconds", self.pool.auth_timeout_seconds),
        ] {
            if value == 0 {
                return Err(PoolError::Config(format!(
                    "pool.{} must be at least 1",
                    name
                )));
            }
            if value > MAX_TIMEOUT_SECONDS {
                return Err(PoolError::Config(format!(
                    "pool.{} must not exceed {} seconds",
                    name, MAX_TIMEOUT_SECONDS
                )));
            }
        }

        if self.pool.idle_timeout_minutes > MAX_IDLE_TIMEOUT_MINUTES {
            return Err(PoolError::Config(format!(
                "pool.idle_timeout_minutes must not exceed {} (one week)",
                MAX_IDLE_TIMEOUT_MINUTES
            )));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(PoolError::Config(format!(
                "Invalid logging format: {}. Must be 'pretty' or 'json'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        let example = r#"[remote]
host = "127.0.0.1"
port = 22
username = "transfer"
password = "change-me"

[pool]
pool_size = 4               # Maximum number of pooled sessions
thread_size = 8             # Concurrent tasks, independent of pool_size
idle_timeout_minutes = 30   # 0 disables idle eviction
borrow_timeout_seconds = 5
connect_timeout_seconds = 5
auth_timeout_seconds = 5

[logging]
level = "info"  # Options: "trace", "debug", "info", "warn", "error"
format = "pretty"  # Options: "pretty", "json"

[telemetry]
max_events = 256
retention_hours = 24
"#;

        std::fs::write(path.as_ref(), example)
            .map_err(|e| PoolError::Config(format!("Failed to write example config: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.remote.port, 22);
        assert_eq!(config.pool.pool_size, 4);
        assert_eq!(config.pool.idle_timeout_minutes, 30);
        assert_eq!(config.pool.borrow_timeout_seconds, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.pool.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pool.thread_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.remote.host = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pool.borrow_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_timeouts_rejected() {
        let result = Config::from_toml(
            r#"
[remote]
host = "files.internal"
username = "svc"

[pool]
idle_timeout_minutes = 400000000000000000
"#,
        );
        assert!(matches!(result, Err(PoolError::Config(_))));

        let mut config = Config::default();
        config.pool.idle_timeout_minutes = MAX_IDLE_TIMEOUT_MINUTES;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.pool.connect_timeout_seconds = MAX_TIMEOUT_SECONDS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
[remote]
host = "files.internal"
username = "svc"
password = "pw"
"#,
        )
        .unwrap();

        assert_eq!(config.remote.host, "files.internal");
        assert_eq!(config.remote.port, 22);
        assert_eq!(config.pool.thread_size, 8);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_example_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sftpool.toml");
        Config::create_example(&path).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.remote.username, "transfer");
        assert_eq!(config.pool.pool_size, 4);
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = Config::default();
        config.remote.password = "hunter2".to_string();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
