//! Repository registry: which roots are indexed, and their latest summary.
//!
//! Records are keyed by canonical root. Roots never nest: indexing a
//! directory that contains recorded roots absorbs them. Persisted as pretty
//! JSON next to the graph snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{CgcError, Result};
use crate::indexer::IndexSummary;

/// How many past job ids are kept per repository.
const JOB_HISTORY_LIMIT: usize = 10;

/// How many caller-written spellings of a root are remembered.
const ALIAS_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub path: PathBuf,
    pub name: String,
    pub indexed_at: DateTime<Utc>,
    pub file_count: usize,
    pub function_count: usize,
    pub class_count: usize,
    pub last_job_id: Option<String>,
    #[serde(default)]
    pub job_history: Vec<String>,
    /// Paths callers indexed this root through (symlinks, trailing
    /// separators, relative paths) when they differ from `path`.
    #[serde(default)]
    pub aliases: Vec<PathBuf>,
}

impl RepositoryRecord {
    /// True when `path` is the canonical root or one of its aliases.
    pub fn answers_to(&self, path: &Path) -> bool {
        self.path == path || self.aliases.iter().any(|a| a == path)
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    records: RwLock<BTreeMap<PathBuf, RepositoryRecord>>,
    path: Option<PathBuf>,
}

impl Registry {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`; a missing or unreadable file starts empty.
    pub fn open(path: PathBuf) -> Self {
        let records = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Vec<RepositoryRecord>>(&text) {
                Ok(list) => list.into_iter().map(|r| (r.path.clone(), r)).collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable repository registry, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            records: RwLock::new(records),
            path: Some(path),
        }
    }

    /// Record a finished run. Cancelled runs still count as indexed: their
    /// committed entities are in the graph. `alias` is the path as the
    /// caller wrote it.
    pub fn record_index(
        &self,
        summary: &IndexSummary,
        job_id: Option<&str>,
        alias: Option<&Path>,
    ) -> Result<RepositoryRecord> {
        let record = {
            let mut records = self
                .records
                .write()
                .map_err(|_| CgcError::poisoned("registry"))?;
            let previous = records.get(&summary.repo_path);
            let mut history = previous.map(|r| r.job_history.clone()).unwrap_or_default();
            if let Some(id) = job_id {
                history.push(id.to_string());
                if history.len() > JOB_HISTORY_LIMIT {
                    history.drain(..history.len() - JOB_HISTORY_LIMIT);
                }
            }
            let mut aliases = previous.map(|r| r.aliases.clone()).unwrap_or_default();
            if let Some(alias) = alias.filter(|a| *a != summary.repo_path) {
                aliases.retain(|a| a != alias);
                aliases.push(alias.to_path_buf());
                if aliases.len() > ALIAS_LIMIT {
                    aliases.drain(..aliases.len() - ALIAS_LIMIT);
                }
            }
            let record = RepositoryRecord {
                path: summary.repo_path.clone(),
                name: summary
                    .repo_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| summary.repo_path.display().to_string()),
                indexed_at: Utc::now(),
                file_count: summary.files_indexed,
                function_count: summary.functions,
                class_count: summary.classes,
                last_job_id: job_id.map(str::to_string),
                job_history: history,
                aliases,
            };
            records.insert(record.path.clone(), record.clone());
            record
        };
        self.save()?;
        Ok(record)
    }

    /// The recorded root strictly containing `path`, if any.
    pub fn enclosing_root(&self, path: &Path) -> Result<Option<PathBuf>> {
        let records = self
            .records
            .read()
            .map_err(|_| CgcError::poisoned("registry"))?;
        Ok(records
            .keys()
            .filter(|root| path.starts_with(root) && root.as_path() != path)
            .min_by_key(|root| root.components().count())
            .cloned())
    }

    /// Find a record by canonical root or by a path a caller indexed it through.
    pub fn lookup(&self, path: &Path) -> Result<Option<RepositoryRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| CgcError::poisoned("registry"))?;
        Ok(records
            .get(path)
            .or_else(|| records.values().find(|r| r.answers_to(path)))
            .cloned())
    }

    pub fn list(&self) -> Result<Vec<RepositoryRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| CgcError::poisoned("registry"))?;
        Ok(records.values().cloned().collect())
    }

    pub fn get(&self, path: &Path) -> Result<Option<RepositoryRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| CgcError::poisoned("registry"))?;
        Ok(records.get(path).cloned())
    }

    /// Forget a repository. Returns the removed record, if there was one.
    pub fn remove(&self, path: &Path) -> Result<Option<RepositoryRecord>> {
        let removed = self
            .records
            .write()
            .map_err(|_| CgcError::poisoned("registry"))?
            .remove(path);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    /// Forget every record strictly inside `root`. Returns the removed records.
    pub fn remove_nested(&self, root: &Path) -> Result<Vec<RepositoryRecord>> {
        let removed: Vec<RepositoryRecord> = {
            let mut records = self
                .records
                .write()
                .map_err(|_| CgcError::poisoned("registry"))?;
            let nested: Vec<PathBuf> = records
                .keys()
                .filter(|p| p.starts_with(root) && p.as_path() != root)
                .cloned()
                .collect();
            nested.iter().filter_map(|p| records.remove(p)).collect()
        };
        if !removed.is_empty() {
            self.save()?;
        }
        Ok(removed)
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let list = self.list()?;
        let json = serde_json::to_string_pretty(&list)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), repositories = list.len(), "registry saved");
        Ok(())
    }
}
