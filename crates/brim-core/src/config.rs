//! Engine and server configuration
//!
//! Layered resolution: built-in defaults, then an optional TOML file,
//! then environment-variable overrides. Environment always wins so
//! deployments can tweak a single knob without editing the file.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Sync-engine tuning knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between scheduler cycles
    pub sync_interval_secs: u64,
    /// An account is due for sync once its last sync is older than this
    pub staleness_minutes: i64,
    /// Analysis window passed to the enrichment service
    pub enrichment_window_months: u32,
    /// Banking aggregator base URL
    pub feed_url: Option<String>,
    /// Enrichment service base URL; absent means local-only classification
    pub enrich_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 300,
            staleness_minutes: 30,
            enrichment_window_months: 6,
            feed_url: None,
            enrich_url: None,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Allowed CORS origins; empty means same-origin only
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            allowed_origins: vec![],
        }
    }
}

/// One connected account declared in the config file
///
/// The OAuth dance that produces these credentials happens in an outer
/// layer; the engine only consumes the result.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountEntry {
    pub account_id: i64,
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// RFC3339; omitted means not yet expired
    pub token_expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub server: ServerConfig,
    /// Connected accounts seeded into the store at startup
    pub accounts: Vec<AccountEntry>,
}

impl Config {
    /// Load from an optional TOML file, then apply env overrides.
    ///
    /// Recognized variables: `BRIM_FEED_URL`, `BRIM_ENRICH_URL`,
    /// `BRIM_SYNC_INTERVAL_SECS`, `BRIM_STALENESS_MINUTES`,
    /// `BRIM_LISTEN_ADDR`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("{}: {}", p.display(), e)))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("BRIM_FEED_URL") {
            self.engine.feed_url = Some(url);
        }
        if let Ok(url) = std::env::var("BRIM_ENRICH_URL") {
            self.engine.enrich_url = Some(url);
        }
        if let Some(secs) = env_parse("BRIM_SYNC_INTERVAL_SECS") {
            self.engine.sync_interval_secs = secs;
        }
        if let Some(minutes) = env_parse("BRIM_STALENESS_MINUTES") {
            self.engine.staleness_minutes = minutes;
        }
        if let Ok(addr) = std::env::var("BRIM_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
