use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WebWalletConfig {
    pub server: ServerConfig,
    pub node: NodeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub log_level: String,
    /// Do not open a browser window on startup.
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// How long an action waits for its background task before answering
    /// with a status page instead.
    #[serde(default = "default_status_wait_ms")]
    pub status_wait_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeConfig {
    pub dir: String,
    #[serde(default = "default_true")]
    pub bootstrap: bool,
    #[serde(default = "default_bootstrap_url")]
    pub bootstrap_url: String,
    /// A local consensus database younger than this is used as is.
    #[serde(default = "default_bootstrap_stale_after_hours")]
    pub bootstrap_stale_after_hours: u64,
    #[serde(default = "default_consensus_poll_ms")]
    pub consensus_poll_ms: u64,
    #[serde(default = "default_true")]
    pub create_gateway: bool,
    #[serde(default = "default_true")]
    pub create_consensus_set: bool,
    #[serde(default = "default_true")]
    pub create_transaction_pool: bool,
    #[serde(default = "default_true")]
    pub create_wallet: bool,
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_timeout_ms() -> u64 {
    5000
}

fn default_status_wait_ms() -> u64 {
    300
}

fn default_bootstrap_url() -> String {
    "https://consensus.scpri.me/releases/consensus-latest.db".to_string()
}

fn default_bootstrap_stale_after_hours() -> u64 {
    24 * 7
}

fn default_consensus_poll_ms() -> u64 {
    1000
}

impl Default for WebWalletConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 4300,
                log_level: "info".to_string(),
                headless: false,
                heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
                status_wait_ms: default_status_wait_ms(),
            },
            node: NodeConfig {
                dir: "./data".to_string(),
                bootstrap: true,
                bootstrap_url: default_bootstrap_url(),
                bootstrap_stale_after_hours: default_bootstrap_stale_after_hours(),
                consensus_poll_ms: default_consensus_poll_ms(),
                create_gateway: true,
                create_consensus_set: true,
                create_transaction_pool: true,
                create_wallet: true,
            },
        }
    }
}

impl WebWalletConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Unreadable(path.to_string(), e.to_string()))?;
        let config: Self = toml::from_str(&s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: &str) -> Self {
        if std::path::Path::new(path).exists() {
            match Self::load(path) {
                Ok(c) => {
                    println!("Config loaded from {}", path);
                    c
                }
                Err(e) => {
                    eprintln!("{}. Using Defaults.", e);
                    Self::default()
                }
            }
        } else {
            println!("Config file not found at '{}'. Creating default.", path);
            let config = Self::default();
            if let Ok(s) = toml::to_string_pretty(&config) {
                let _ = std::fs::write(path, s);
            }
            config
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must not be 0".to_string()));
        }
        if self.node.dir.trim().is_empty() {
            return Err(ConfigError::InvalidDirectory(
                self.node.dir.clone(),
                "directory is empty".to_string(),
            ));
        }
        if self.node.create_transaction_pool && !self.node.create_consensus_set {
            return Err(ConfigError::Invalid(
                "transaction pool requires the consensus set".to_string(),
            ));
        }
        Ok(())
    }

    /// Node directory resolved against the working directory.
    pub fn abs_dir(&self) -> Result<PathBuf, ConfigError> {
        std::path::absolute(&self.node.dir)
            .map_err(|e| ConfigError::InvalidDirectory(self.node.dir.clone(), e.to_string()))
    }

    pub fn wallets_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.abs_dir()?.join(crate::node::WALLETS_DIR))
    }

    /// Age after which a local consensus database is bootstrapped again.
    pub fn bootstrap_stale_after(&self) -> Duration {
        Duration::from_secs(self.node.bootstrap_stale_after_hours.saturating_mul(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WebWalletConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 4300);
        assert!(config.node.create_wallet);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let s = r#"
            [server]
            port = 4400
            log_level = "debug"

            [node]
            dir = "/tmp/scp"
            bootstrap = false
        "#;
        let config: WebWalletConfig = toml::from_str(s).unwrap();
        assert_eq!(config.server.port, 4400);
        assert_eq!(config.server.heartbeat_timeout_ms, 5000);
        assert!(!config.node.bootstrap);
        assert!(config.node.create_gateway);
    }

    #[test]
    fn test_pool_without_consensus_rejected() {
        let mut config = WebWalletConfig::default();
        config.node.create_consensus_set = false;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_or_default_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webwallet.toml");
        let path = path.to_str().unwrap();

        let config = WebWalletConfig::load_or_default(path);
        assert_eq!(config, WebWalletConfig::default());
        assert_eq!(WebWalletConfig::load(path).unwrap(), config);
    }

    #[test]
    fn test_bootstrap_stale_after() {
        let mut config = WebWalletConfig::default();
        assert_eq!(config.bootstrap_stale_after(), Duration::from_secs(7 * 24 * 3600));
        config.node.bootstrap_stale_after_hours = u64::MAX;
        assert_eq!(config.bootstrap_stale_after(), Duration::from_secs(u64::MAX));
    }
}
