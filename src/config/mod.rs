//! On-disk TOML configuration for the command-line tools.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{Error, Kind, Result};
use crate::server::{OPT_BUCKET, OPT_PROJECT};

const OP_LOAD: &str = "config.load";

fn default_cache_max_bytes() -> i64 {
    5 * 1024 * 1024 * 1024
}

fn default_cache_max_entries() -> usize {
    100_000
}

/// Tool configuration.
///
/// ```toml
/// user = "ann@example.com"
/// bucket_name = "my-bucket"
/// project_id = "my-project"
/// cache_dir = "/var/cache/canopy"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The identity the tools run as.
    pub user: String,
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub project_id: String,
    /// Root of the local block cache. Defaults to a temporary
    /// directory when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: i64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::io(OP_LOAD, e).path(path.display().to_string())
        })?;
        toml::from_str(&text).map_err(|e| {
            Error::new(OP_LOAD, Kind::Invalid)
                .path(path.display().to_string())
                .detail(e.to_string())
        })
    }

    /// The `Configure` options this config describes.
    pub fn options(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.bucket_name.is_empty() {
            out.push(format!("{OPT_BUCKET}={}", self.bucket_name));
        }
        if !self.project_id.is_empty() {
            out.push(format!("{OPT_PROJECT}={}", self.project_id));
        }
        out
    }
}
