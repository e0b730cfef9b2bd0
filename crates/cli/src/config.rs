//! Layered configuration loaded from an XDG-style config path.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "rangefetch";
const CONFIG_FILE: &str = "config.toml";

/// User-facing settings for the `rangefetch` CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of downloads the scheduler drives at once.
    pub concurrency: usize,
    /// Destination directory for assembled files. Falls back to the
    /// platform download directory when unset.
    pub dest_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 2,
            dest_dir: None,
        }
    }
}

impl Config {
    /// Loads config from `<config-dir>/rangefetch/config.toml`, falling
    /// back to defaults if the file does not exist.
    pub async fn load() -> Result<Self> {
        let path = Self::path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn dest_dir(&self) -> PathBuf {
        self.dest_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(std::env::temp_dir)
    }

    fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
            .join(CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_concurrency_is_two() {
        assert_eq!(Config::default().concurrency, 2);
    }

    #[test]
    fn dest_dir_falls_back_when_unset() {
        let config = Config::default();
        // Just confirm it resolves to something; the exact platform
        // default directory isn't this crate's concern.
        assert!(config.dest_dir().components().count() > 0);
    }
}
