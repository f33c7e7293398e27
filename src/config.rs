//! Sync engine configuration.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunables for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server origin for mutation submission.
    pub server_url: String,
    /// Per-request timeout so a hung connection cannot stall the queue.
    pub request_timeout_secs: u64,
    /// Drain at startup when already online.
    pub drain_on_start: bool,
    /// Move unroutable mutations to dead letters after this many skipped
    /// cycles. `None` keeps them pending indefinitely.
    pub dead_letter_after: Option<u32>,
    /// Retention window for synced mutations kept as audit trail.
    pub prune_synced_after_days: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 30, // Matches the server's gateway timeout
            drain_on_start: true,
            dead_letter_after: None, // Stuck mutations stay visible as pending
            prune_synced_after_days: Some(30),
        }
    }
}

impl SyncConfig {
    /// Load from a TOML file; missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

/// Per-user data directory for the store file.
pub fn default_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "Tourbase", "tourbase-guide").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Default location of the embedded database.
pub fn default_store_path() -> Option<PathBuf> {
    default_data_dir().map(|dir| dir.join("guide-sync.duckdb"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_sane() {
        let config = SyncConfig::default();
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.drain_on_start);
        assert!(config.dead_letter_after.is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(
            &path,
            "server_url = \"https://api.tourbase.example\"\ndead_letter_after = 5\n",
        )
        .unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.server_url, "https://api.tourbase.example");
        assert_eq!(config.dead_letter_after, Some(5));
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(SyncConfig::load("/nonexistent/sync.toml").is_err());
    }
}
