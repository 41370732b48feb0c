//! Runtime configuration loaded from `.cgc/config.toml`.
//!
//! Every key is optional; a missing file yields the defaults and a broken
//! file is reported and ignored so the server always starts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".cgc/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CgcConfig {
    /// Where the graph snapshot and repository registry live.
    pub data_dir: PathBuf,
    /// Number of indexing jobs allowed to run at once.
    pub workers: usize,
    /// Files larger than this (bytes) are skipped.
    pub max_file_size: u64,
    /// Directory names never descended into.
    pub ignore_dirs: Vec<String>,
    /// Index dot-files and dot-directories.
    pub index_hidden: bool,
    /// Write the graph to disk after each job and deletion.
    pub persist: bool,
    /// Row cap for Cypher queries without a LIMIT.
    pub max_query_rows: usize,
    /// Default number of `find_code` hits.
    pub search_limit: usize,
    /// Files parsed in parallel before a commit/cancellation checkpoint.
    pub chunk_size: usize,
}

impl Default for CgcConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".cgc"),
            workers: 2,
            max_file_size: 1024 * 1024,
            ignore_dirs: [
                "node_modules",
                "__pycache__",
                ".venv",
                "venv",
                "target",
                "dist",
                "build",
                ".git",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            index_hidden: false,
            persist: true,
            max_query_rows: 1000,
            search_limit: 20,
            chunk_size: 32,
        }
    }
}

impl CgcConfig {
    /// Load config from `path`, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        let mut config = if path.exists() {
            match Self::from_file(path) {
                Ok(config) => {
                    debug!(path = %path.display(), "loaded config");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        config.apply_env();
        config
    }

    /// Resolve the config file location: explicit path, `$CGC_CONFIG`, or the default.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        std::env::var_os("CGC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: CgcConfig = toml::from_str(text)?;
        Ok(config.normalized())
    }

    fn apply_env(&mut self) {
        if let Some(dir) = std::env::var_os("CGC_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(workers) = std::env::var("CGC_WORKERS") {
            match workers.parse::<usize>() {
                Ok(n) => self.workers = n,
                Err(_) => warn!(value = %workers, "ignoring non-numeric CGC_WORKERS"),
            }
        }
        *self = std::mem::take(self).normalized();
    }

    fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.chunk_size = self.chunk_size.max(1);
        self.search_limit = self.search_limit.max(1);
        self.max_query_rows = self.max_query_rows.max(1);
        self
    }

    /// Absolute data directory (relative paths resolve against the cwd).
    pub fn resolved_data_dir(&self) -> PathBuf {
        if self.data_dir.is_absolute() {
            self.data_dir.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.data_dir))
                .unwrap_or_else(|_| self.data_dir.clone())
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.resolved_data_dir().join("graph.bin")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.resolved_data_dir().join("repositories.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = CgcConfig::from_toml("workers = 4\npersist = false\n").unwrap();
        assert_eq!(config.workers, 4);
        assert!(!config.persist);
        assert_eq!(config.max_query_rows, 1000);
        assert!(config.ignore_dirs.iter().any(|d| d == "node_modules"));
    }

    #[test]
    fn zero_workers_is_clamped() {
        let config = CgcConfig::from_toml("workers = 0").unwrap();
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(CgcConfig::from_toml("workers = \"many\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CgcConfig::load(&dir.path().join("nope.toml"));
        assert!(config.workers >= 1);
    }
}
