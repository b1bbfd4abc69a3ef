//! haproxy-keeper Configuration
//!
//! This module provides configuration structures for the keeper: where the
//! live HAProxy config and admin socket are, how the service is validated
//! and restarted, and where the backup registry lives.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::admin::AdminClient;
use crate::apply::{HaproxyValidator, OrchestratorConfig, SystemctlController};

/// Environment variable overriding `haproxy.config_path`
pub const ENV_CONFIG_PATH: &str = "HAPROXY_CONFIG_PATH";
/// Environment variable overriding `admin.socket_path`
pub const ENV_SOCKET_PATH: &str = "HAPROXY_SOCKET_PATH";
/// Environment variable overriding `backups.registry_path`
pub const ENV_DATABASE_PATH: &str = "DATABASE_PATH";

/// Main keeper configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// HAProxy installation
    #[serde(default)]
    pub haproxy: HaproxyConfig,

    /// Admin socket
    #[serde(default)]
    pub admin: AdminConfig,

    /// Apply timeouts
    #[serde(default)]
    pub apply: ApplyConfig,

    /// Backup registry
    #[serde(default)]
    pub backups: BackupConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HAProxy installation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaproxyConfig {
    /// Live configuration file
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// HAProxy binary used for `-c -f` validation
    #[serde(default = "default_binary")]
    pub binary: String,

    /// systemd unit to restart/reload
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Prefix systemctl with sudo
    #[serde(default = "default_true")]
    pub use_sudo: bool,

    /// systemctl binary
    #[serde(default = "default_systemctl")]
    pub systemctl: String,
}

/// Admin socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Stats socket with `level admin`
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Connect/read/write timeout in seconds
    #[serde(default = "default_socket_timeout")]
    pub timeout_secs: u64,
}

/// Apply timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Restart/reload timeout in seconds
    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_secs: u64,

    /// Validator timeout in seconds
    #[serde(default = "default_validate_timeout")]
    pub validate_timeout_secs: u64,
}

/// Backup registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// SQLite registry database
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/haproxy/haproxy.cfg")
}

fn default_binary() -> String {
    "haproxy".to_string()
}

fn default_service_name() -> String {
    "haproxy".to_string()
}

fn default_true() -> bool {
    true
}

fn default_systemctl() -> String {
    "systemctl".to_string()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/haproxy/admin.sock")
}

fn default_socket_timeout() -> u64 {
    10
}

fn default_restart_timeout() -> u64 {
    10
}

fn default_validate_timeout() -> u64 {
    30
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("/var/lib/haproxy-keeper/backups.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for HaproxyConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            binary: default_binary(),
            service_name: default_service_name(),
            use_sudo: true,
            systemctl: default_systemctl(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            timeout_secs: default_socket_timeout(),
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            restart_timeout_secs: default_restart_timeout(),
            validate_timeout_secs: default_validate_timeout(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            registry_path: default_registry_path(),
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

impl KeeperConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KeeperConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: KeeperConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HAPROXY_CONFIG_PATH`, `HAPROXY_SOCKET_PATH` and `DATABASE_PATH`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_CONFIG_PATH) {
            self.haproxy.config_path = PathBuf::from(path);
        }
        if let Some(path) = get(ENV_SOCKET_PATH) {
            self.admin.socket_path = PathBuf::from(path);
        }
        if let Some(path) = get(ENV_DATABASE_PATH) {
            self.backups.registry_path = PathBuf::from(path);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.haproxy.config_path.as_os_str().is_empty() {
            return Err(crate::Error::Config("haproxy.config_path cannot be empty".into()));
        }

        if self.haproxy.config_path.file_name().is_none() {
            return Err(crate::Error::Config("haproxy.config_path must name a file".into()));
        }

        if self.haproxy.binary.is_empty() {
            return Err(crate::Error::Config("haproxy.binary cannot be empty".into()));
        }

        if self.haproxy.service_name.is_empty() {
            return Err(crate::Error::Config("haproxy.service_name cannot be empty".into()));
        }

        if self.haproxy.systemctl.is_empty() {
            return Err(crate::Error::Config("haproxy.systemctl cannot be empty".into()));
        }

        if self.admin.socket_path.as_os_str().is_empty() {
            return Err(crate::Error::Config("admin.socket_path cannot be empty".into()));
        }

        if self.backups.registry_path.as_os_str().is_empty() {
            return Err(crate::Error::Config("backups.registry_path cannot be empty".into()));
        }

        if self.admin.timeout_secs == 0
            || self.apply.restart_timeout_secs == 0
            || self.apply.validate_timeout_secs == 0
        {
            return Err(crate::Error::Config("timeouts must be greater than zero".into()));
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" => Ok(()),
            other => Err(crate::Error::Config(format!(
                "logging.format must be 'pretty' or 'compact', got '{}'",
                other
            ))),
        }
    }

    /// Get admin socket timeout as Duration
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.admin.timeout_secs)
    }

    /// Get restart timeout as Duration
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.apply.restart_timeout_secs)
    }

    /// Get validator timeout as Duration
    pub fn validate_timeout(&self) -> Duration {
        Duration::from_secs(self.apply.validate_timeout_secs)
    }

    /// Orchestrator settings
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            config_path: self.haproxy.config_path.clone(),
            service_name: self.haproxy.service_name.clone(),
            restart_timeout: self.restart_timeout(),
            validate_timeout: self.validate_timeout(),
        }
    }

    /// `haproxy -c -f` validator
    pub fn validator(&self) -> HaproxyValidator {
        HaproxyValidator::new(self.haproxy.binary.clone())
    }

    /// systemctl service controller
    pub fn controller(&self) -> SystemctlController {
        SystemctlController::new(self.haproxy.systemctl.clone(), self.haproxy.use_sudo)
    }

    /// Admin socket client
    pub fn admin_client(&self) -> AdminClient {
        AdminClient::new(self.admin.socket_path.clone(), self.socket_timeout())
    }
}
