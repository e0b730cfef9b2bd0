//! Persisted list of queued downloads, backing the `add`/`run`/`status`
//! subcommands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const QUEUE_FILE: &str = "queue.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueFile {
    #[serde(default)]
    pub entries: Vec<QueueEntry>,
}

impl QueueFile {
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

    pub async fn save(&self) -> Result<()> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("serializing queue")?;
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("rangefetch")
            .join(QUEUE_FILE)
    }
}
