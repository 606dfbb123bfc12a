use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::types::error::{BridgeError, Result};
use crate::types::ImapCredentials;

/// Floor for the poll interval. Anything lower hammers mail providers and
/// the data store for no benefit.
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;

/// Application configuration, validated once at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Poller tuning knobs
    #[serde(default)]
    pub poller: PollerConfig,

    /// Mailbox integrations to seed the standalone daemon with.
    /// A deployment embedding the engine supplies integrations through its
    /// own store instead.
    #[serde(default)]
    pub integrations: Vec<IntegrationConfig>,
}

/// Poll scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Seconds between poll ticks (floor: 10)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How many days back mailbox searches look. Bounds worst-case search
    /// size against late or out-of-order delivery.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    /// Per-mailbox budget for one poll, so one unreachable server cannot
    /// stall the whole tick.
    #[serde(default = "default_mailbox_timeout")]
    pub mailbox_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            lookback_days: default_lookback_days(),
            mailbox_timeout_secs: default_mailbox_timeout(),
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn mailbox_timeout(&self) -> Duration {
        Duration::from_secs(self.mailbox_timeout_secs)
    }
}

/// One configured mailbox integration (standalone daemon only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub organization_id: String,
    #[serde(flatten)]
    pub credentials: ImapCredentials,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_lookback_days() -> i64 {
    7
}

fn default_mailbox_timeout() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            integrations: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config: {}", e)))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the first default path that exists, or fall back to an
    /// empty config.
    pub fn load_default() -> Result<Self> {
        for path in default_config_paths() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Enforce invariants that cannot be expressed through serde defaults.
    pub fn validate(&self) -> Result<()> {
        if self.poller.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            return Err(BridgeError::Config(format!(
                "poll_interval_secs must be at least {} (got {})",
                MIN_POLL_INTERVAL_SECS, self.poller.poll_interval_secs
            )));
        }

        if self.poller.lookback_days < 1 {
            return Err(BridgeError::Config(format!(
                "lookback_days must be at least 1 (got {})",
                self.poller.lookback_days
            )));
        }

        if self.poller.mailbox_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "mailbox_timeout_secs must be non-zero".to_string(),
            ));
        }

        for integration in &self.integrations {
            if integration.credentials.host.is_empty() {
                return Err(BridgeError::Config(format!(
                    "integration for organization '{}' has an empty host",
                    integration.organization_id
                )));
            }
        }

        Ok(())
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mailbridge").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("mailbridge")
                .join("config.toml"),
        );
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.poller.poll_interval_secs, 60);
        assert_eq!(config.poller.lookback_days, 7);
        assert_eq!(config.poller.mailbox_timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interval_floor_enforced() {
        let mut config = AppConfig::default();
        config.poller.poll_interval_secs = 5;
        assert!(config.validate().is_err());

        config.poller.poll_interval_secs = MIN_POLL_INTERVAL_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_with_defaults() {
        let toml = r#"
            [poller]
            poll_interval_secs = 120

            [[integrations]]
            organization_id = "org-1"
            host = "imap.example.com"
            username = "support@example.com"
            password = "hunter2"
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.poller.poll_interval_secs, 120);
        assert_eq!(config.poller.lookback_days, 7);

        let integration = &config.integrations[0];
        assert_eq!(integration.credentials.port, 993);
        assert!(integration.credentials.secure);
        assert!(integration.enabled);
    }

    #[test]
    fn test_empty_host_rejected() {
        let toml = r#"
            [[integrations]]
            organization_id = "org-1"
            host = ""
            username = "support@example.com"
            password = "hunter2"
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
