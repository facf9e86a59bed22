use anyhow::{Context as _, Result};
use ctxbridge::EngineConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::read_to_string;
use std::path::Path;

/// Environment variable overriding [`Config::log_filter`].
pub const LOG_FILTER_ENV: &str = "CTXBRIDGE_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub log_filter: String,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "warn".to_owned(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` when given, defaults otherwise, then apply the
    /// environment override.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_log_override(env::var(LOG_FILTER_ENV).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn with_log_override(mut self, filter: Option<String>) -> Self {
        if let Some(filter) = filter.filter(|filter| !filter.trim().is_empty()) {
            self.log_filter = filter;
        }
        self
    }
}
