//! Source discovery: which files under a root get indexed.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::CgcConfig;
use crate::error::{CgcError, Result};
use crate::parser::SupportedLanguage;

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub ignore_dirs: Vec<String>,
    pub index_hidden: bool,
    pub max_file_size: u64,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::from(&CgcConfig::default())
    }
}

impl From<&CgcConfig> for WalkOptions {
    fn from(config: &CgcConfig) -> Self {
        Self {
            ignore_dirs: config.ignore_dirs.clone(),
            index_hidden: config.index_hidden,
            max_file_size: config.max_file_size,
        }
    }
}

/// Supported source files under `root`, sorted by path.
///
/// Respects `.gitignore` (with or without a git checkout), skips hidden
/// entries unless enabled, configured directory names, and oversized files.
/// A file root yields itself when its language is supported.
pub fn discover_files(root: &Path, options: &WalkOptions) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return match SupportedLanguage::from_path(root) {
            Some(_) => Ok(vec![root.to_path_buf()]),
            None => Err(CgcError::validation(format!(
                "unsupported file type: {}",
                root.display()
            ))),
        };
    }

    let ignore_dirs = options.ignore_dirs.clone();
    let mut files: Vec<PathBuf> = WalkBuilder::new(root)
        .hidden(!options.index_hidden)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .require_git(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !(is_dir
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| ignore_dirs.iter().any(|d| d == name)))
        })
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|entry| SupportedLanguage::from_path(entry.path()).is_some())
        .filter(|entry| {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > options.max_file_size {
                debug!(file = %entry.path().display(), size, "skipping oversized file");
                false
            } else {
                true
            }
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}
