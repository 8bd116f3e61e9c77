//! pmsync configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmsyncConfig {
    /// Application record store (users, workspaces, tasks).
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Durable workflow runs and step journal.
    #[serde(default = "default_scheduler_db_path")]
    pub scheduler_db_path: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_database_path() -> String { "~/.pmsync/app.db".into() }
fn default_scheduler_db_path() -> String { "~/.pmsync/scheduler.db".into() }

impl Default for PmsyncConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scheduler_db_path: default_scheduler_db_path(),
            gateway: GatewayConfig::default(),
            mail: MailConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl PmsyncConfig {
    /// Load config from the default path (~/.pmsync/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("Failed to parse config: {e}")))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config.with_env_overrides())
    }

    /// Write config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Secrets are usually injected by the deployment rather than written to disk.
    fn with_env_overrides(mut self) -> Self {
        if let Ok(secret) = std::env::var("PMSYNC_SIGNING_SECRET")
            && !secret.is_empty()
        {
            self.gateway.signing_secret = secret;
        }
        if let Ok(password) = std::env::var("PMSYNC_SMTP_PASSWORD")
            && !password.is_empty()
        {
            self.mail.password = password;
        }
        self
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the pmsync home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pmsync")
    }

    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.database_path)
    }

    pub fn scheduler_db_path(&self) -> PathBuf {
        expand_path(&self.scheduler_db_path)
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// HTTP ingress configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret for `X-Webhook-Signature`. Empty disables verification.
    #[serde(default)]
    pub signing_secret: String,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 4000 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            signing_secret: String::new(),
        }
    }
}

/// Outbound SMTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// When false, messages are logged instead of sent.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_smtp_host() -> String { "smtp-relay.brevo.com".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_from_name() -> String { "Project Management".into() }

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_email: String::new(),
            from_name: default_from_name(),
        }
    }
}

/// Durable timer loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often sleeping runs are checked for wake-up.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

fn default_tick_interval() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
        }
    }
}
