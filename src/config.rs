//! `viewsdk.toml` file configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_CAPACITY_BYTES;
use crate::context::SessionIds;
use crate::metrics::config::DEFAULT_MIN_BACKOFF;
use crate::metrics::{MetricsConfig, DEFAULT_INTERVAL_MS, DEFAULT_URI};

pub const CONFIG_FILENAME: &str = "viewsdk.toml";

/// Directory under the platform data dir holding the cache files.
const DATA_SUBDIR: &str = "viewsdk";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SdkConfig {
    #[serde(default)]
    pub metrics: MetricsSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSection {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: i64,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            interval_ms: default_interval_ms(),
            domain: None,
            min_backoff_ms: default_min_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSection {
    /// Defaults to `<data dir>/viewsdk`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: None,
            capacity_bytes: default_capacity_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub application: Option<String>,
    #[serde(default = "default_view")]
    pub view: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            account: None,
            application: None,
            view: default_view(),
        }
    }
}

fn default_uri() -> String {
    DEFAULT_URI.to_string()
}

fn default_interval_ms() -> i64 {
    DEFAULT_INTERVAL_MS
}

fn default_min_backoff_ms() -> u64 {
    DEFAULT_MIN_BACKOFF.as_millis() as u64
}

fn default_capacity_bytes() -> usize {
    DEFAULT_CAPACITY_BYTES
}

fn default_view() -> String {
    "default".to_string()
}

impl SdkConfig {
    /// Load `viewsdk.toml` from the working directory, or defaults when absent.
    pub fn load() -> Result<Self> {
        if Path::new(CONFIG_FILENAME).exists() {
            load_config_from_path(CONFIG_FILENAME)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn metrics_config(&self) -> MetricsConfig {
        let mut config = MetricsConfig::default()
            .with_uri(self.metrics.uri.clone())
            .with_interval_ms(self.metrics.interval_ms)
            .with_min_backoff(Duration::from_millis(self.metrics.min_backoff_ms));
        if let Some(domain) = &self.metrics.domain {
            config = config.with_domain(domain.clone());
        }
        config
    }

    pub fn session_ids(&self) -> SessionIds {
        SessionIds {
            account: self.session.account.clone(),
            application: self.session.application.clone(),
            view: self.session.view.clone(),
        }
    }

    /// Configured cache directory, else the platform data directory.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache.dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|d| d.join(DATA_SUBDIR))
            .context("No data directory available; set [cache] dir in viewsdk.toml")
    }
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<SdkConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    parse_config(&content).with_context(|| format!("Failed to parse {}", path.as_ref().display()))
}

pub fn parse_config(content: &str) -> Result<SdkConfig> {
    let config: SdkConfig = toml::from_str(content)?;
    config.metrics_config().validate()?;
    Ok(config)
}
