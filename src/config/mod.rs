//! Typed configuration.
//!
//! Process settings come from environment variables and load once at
//! startup. Engine tuning (time boxes, proxies, gate policy, the user
//! directory) lives in a TOML file. Sensitive values are wrapped in
//! `secrecy::SecretString` to keep them out of logs.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::gate::TeamVerificationPolicy;
use crate::model::{Role, UserId};

#[derive(Debug)]
pub struct Config {
    /// Postgres ledger. `None` keeps ledgers in process.
    pub database_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub engine_config: Option<PathBuf>,
    pub bind_addr: String,
    /// JSON snapshot for the in-process ledger.
    pub state_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            std::env::var("CLICKWORK_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        if bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Config(format!(
                "CLICKWORK_BIND is not a socket address: {bind_addr}"
            )));
        }

        Ok(Self {
            database_url: optional_var("DATABASE_URL").map(SecretString::from),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            engine_config: optional_var("CLICKWORK_CONFIG").map(PathBuf::from),
            bind_addr,
            state_file: optional_var("CLICKWORK_STATE_FILE").map(PathBuf::from),
        })
    }

    /// Engine settings from `CLICKWORK_CONFIG`, or defaults when unset.
    pub fn engine(&self) -> Result<EngineConfig> {
        match self.engine_config {
            Some(ref path) => EngineConfig::load(path),
            None => Ok(EngineConfig::default()),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Engine settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub walker: WalkerConfig,
    pub gate: GateConfig,
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Time box for a single review item.
    pub item_cap_seconds: u32,
    /// Length of a reviewer's whole shift.
    pub session_cap_seconds: u32,
    /// Pause between a decision and the next item. Zero advances at once.
    pub settle_delay_seconds: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            item_cap_seconds: 600,
            session_cap_seconds: 8 * 60 * 60,
            settle_delay_seconds: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    /// Used for links that arrive without their own minimum.
    pub default_review_seconds: u32,
    pub proxy_pool: Vec<String>,
    pub mask_base_url: String,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            default_review_seconds: 30,
            proxy_pool: vec!["proxy-a".to_string(), "proxy-b".to_string()],
            mask_base_url: "https://go.clickwork.local/r".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub team_verification: TeamVerificationPolicy,
}

/// A directory entry: who a `x-user-id` header resolves to.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub id: UserId,
    pub role: Role,
    #[serde(default)]
    pub team: Vec<UserId>,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read engine config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad engine config {}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.queue.item_cap_seconds == 0 {
            return Err(Error::Config("queue.item_cap_seconds must be positive".into()));
        }
        if self.queue.session_cap_seconds == 0 {
            return Err(Error::Config("queue.session_cap_seconds must be positive".into()));
        }
        if self.walker.proxy_pool.is_empty() {
            return Err(Error::Config("walker.proxy_pool must not be empty".into()));
        }
        Ok(())
    }
}
