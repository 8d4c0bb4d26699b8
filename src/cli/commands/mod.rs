mod cache;
mod collector;
mod track;

pub use cache::execute_cache;
pub use collector::execute_collector;
pub use track::{execute_track, parse_prop};

use anyhow::Result;
use std::path::Path;

use crate::config::{load_config_from_path, SdkConfig};

/// Explicit `--config` path, else `./viewsdk.toml`, else defaults.
pub fn load_config(path: Option<&Path>) -> Result<SdkConfig> {
    match path {
        Some(path) => load_config_from_path(path),
        None => SdkConfig::load(),
    }
}
