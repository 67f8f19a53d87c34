//! Persistence configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::persistence::DEFAULT_MAX_FILE_SIZE;

fn default_checkpoint_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Load retained messages at startup and checkpoint them
    pub enabled: bool,

    /// Directory holding the persistence files
    pub storage_dir: PathBuf,

    /// Retained message file name inside `storage_dir`
    pub retained_file: String,

    /// Checkpoint interval (e.g., "30s", "5m")
    #[serde(default = "default_checkpoint_interval", with = "humantime_serde")]
    pub checkpoint_interval: Duration,

    /// Files larger than this are refused before they are read
    pub max_file_size: u64,
}

impl PersistenceConfig {
    pub fn retained_path(&self) -> PathBuf {
        self.storage_dir.join(&self.retained_file)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_dir: PathBuf::from("./data"),
            retained_file: "retained.db".to_string(),
            checkpoint_interval: default_checkpoint_interval(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}
