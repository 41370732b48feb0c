//! Indexing pipeline: source tree in, graph entities out.
//!
//! A run replaces the repository's subgraph: discover files, parse them in
//! parallel chunks, commit one batch per file, then resolve the references
//! that crossed file boundaries in a single finalization pass.

pub mod batch;
pub mod resolve;
pub mod walk;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CgcConfig;
use crate::error::{CgcError, Result};
use crate::graph::{FileExtraction, GraphStore};
use crate::parser::extract_file;
use batch::build_file_batch;
use resolve::{Deferred, SymbolTable};
pub use walk::{discover_files, WalkOptions};

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub walk: WalkOptions,
    /// Files parsed together between commits and cancellation checks.
    pub chunk_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self::from(&CgcConfig::default())
    }
}

impl From<&CgcConfig> for IndexOptions {
    fn from(config: &CgcConfig) -> Self {
        Self {
            walk: WalkOptions::from(config),
            chunk_size: config.chunk_size.max(1),
        }
    }
}

/// Progress counters reported while a run is in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexProgress {
    pub total_files: usize,
    pub processed_files: usize,
    pub current_file: Option<String>,
}

type ProgressFn = dyn Fn(&IndexProgress) + Send + Sync;

/// Cancellation flag plus an optional progress sink, shared with the job
/// that owns the run.
#[derive(Clone, Default)]
pub struct IndexControl {
    cancelled: Arc<AtomicBool>,
    progress: Option<Arc<ProgressFn>>,
}

impl IndexControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, sink: impl Fn(&IndexProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(sink));
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn report(&self, progress: &IndexProgress) {
        if let Some(sink) = &self.progress {
            sink(progress);
        }
    }
}

impl std::fmt::Debug for IndexControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexControl")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub repo_path: PathBuf,
    pub total_files: usize,
    pub files_indexed: usize,
    pub failed_files: usize,
    pub modules: usize,
    pub functions: usize,
    pub classes: usize,
    pub variables: usize,
    pub edges_resolved: usize,
    pub unresolved: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl std::fmt::Display for IndexSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Indexed {}/{} files ({} failed): {} modules, {} functions, {} classes, {} variables; {} cross-file edges, {} unresolved references{} in {}ms",
            self.files_indexed,
            self.total_files,
            self.failed_files,
            self.modules,
            self.functions,
            self.classes,
            self.variables,
            self.edges_resolved,
            self.unresolved,
            if self.cancelled { " (cancelled)" } else { "" },
            self.duration_ms
        )
    }
}

/// Absolute form of `path` as the caller wrote it: relative paths are joined
/// to the working directory and trailing separators dropped, but symlinks
/// are left unresolved.
pub fn absolute_unresolved(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute.components().collect()
}

/// Canonical absolute form of a repository path. Missing paths are a
/// validation error.
pub fn canonical_root(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(CgcError::validation("path must not be empty"));
    }
    std::fs::canonicalize(path)
        .map_err(|_| CgcError::validation(format!("path does not exist: {}", path.display())))
}

pub struct Indexer<'a> {
    store: &'a GraphStore,
    options: IndexOptions,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a GraphStore, options: IndexOptions) -> Self {
        Self { store, options }
    }

    /// Index `path` as one repository, replacing whatever was indexed there.
    pub fn index(&self, path: &Path, control: &IndexControl) -> Result<IndexSummary> {
        let root = canonical_root(path)?;
        let _guard = self.store.lock_repository(&root)?;
        self.replace(&root, control)
    }

    /// Replace the subgraph under the canonical `root`. The caller must hold
    /// the repository lock for `root`.
    pub fn replace(&self, root: &Path, control: &IndexControl) -> Result<IndexSummary> {
        let started = Instant::now();
        let root = root.to_path_buf();

        let removed = self.store.delete_repository(&root)?;
        if removed > 0 {
            debug!(repo = %root.display(), removed, "cleared previous index");
        }

        let files = discover_files(&root, &self.options.walk)?;
        info!(repo = %root.display(), files = files.len(), "indexing repository");

        let mut summary = IndexSummary {
            repo_path: root.clone(),
            total_files: files.len(),
            ..Default::default()
        };
        let mut progress = IndexProgress {
            total_files: files.len(),
            ..Default::default()
        };
        control.report(&progress);

        let mut table = SymbolTable::new(&root);
        let mut deferred: Vec<Deferred> = Vec::new();

        for chunk in files.chunks(self.options.chunk_size) {
            if control.is_cancelled() {
                info!(repo = %root.display(), processed = progress.processed_files, "indexing cancelled");
                summary.cancelled = true;
                break;
            }

            let parsed: Vec<(&PathBuf, Result<FileExtraction>)> = chunk
                .par_iter()
                .map(|file| (file, read_and_extract(file)))
                .collect();

            for (file, extraction) in parsed {
                progress.processed_files += 1;
                progress.current_file = Some(file.display().to_string());
                match extraction {
                    Ok(extraction) => {
                        let file_batch = build_file_batch(&root, extraction);
                        self.store.commit_batch(file_batch.batch)?;
                        table.add_file(file_batch.index);
                        deferred.extend(file_batch.deferred);
                        summary.files_indexed += 1;
                        debug!(file = %file.display(), "committed file");
                    }
                    Err(e) => {
                        summary.failed_files += 1;
                        warn!(file = %file.display(), error = %e, "skipping file");
                    }
                }
                control.report(&progress);
            }
        }

        // Finalization: everything committed so far gets its cross-file edges.
        let resolution = table.resolve(&deferred);
        summary.edges_resolved = self.store.upsert_relationships(&resolution.relationships)?;
        summary.unresolved = resolution.unresolved;
        debug!(
            repo = %root.display(),
            modules = table.len(),
            deferred = deferred.len(),
            unresolved = resolution.unresolved,
            "resolved deferred references"
        );

        let stats = self.store.stats(Some(&root))?;
        summary.modules = stats.modules;
        summary.functions = stats.functions;
        summary.classes = stats.classes;
        summary.variables = stats.variables;
        summary.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            repo = %root.display(),
            files = summary.files_indexed,
            failed = summary.failed_files,
            functions = summary.functions,
            classes = summary.classes,
            cancelled = summary.cancelled,
            duration_ms = summary.duration_ms,
            "indexing finished"
        );
        Ok(summary)
    }
}

fn read_and_extract(path: &Path) -> Result<FileExtraction> {
    let source = std::fs::read_to_string(path)?;
    extract_file(path, &source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeKind, NodeKind};
    use petgraph::Direction;
    use std::fs;
    use std::sync::Mutex;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join("module_b.py"),
            "def helper(x):\n    return x * 2\n\nclass Base:\n    def setup(self):\n        pass\n",
        )
        .unwrap();
        fs::write(
            root.join("module_a.py"),
            "import math\nfrom module_b import helper, Base\n\nclass Child(Base):\n    def run(self):\n        self.setup()\n\ndef foo():\n    return helper(math.sqrt(4))\n",
        )
        .unwrap();
        fs::write(root.join("broken.py"), [0xff, 0xfe, 0x00]).unwrap();
        dir
    }

    #[test]
    fn indexes_and_links_across_files() {
        let dir = project();
        let store = GraphStore::in_memory(100);
        let summary = Indexer::new(&store, IndexOptions::default())
            .index(dir.path(), &IndexControl::new())
            .unwrap();

        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.files_indexed, 2);
        assert_eq!(summary.failed_files, 1);
        assert_eq!(summary.modules, 2);
        assert!(!summary.cancelled);

        store
            .read(|graph| {
                let foo = graph.by_name_and_kind("foo", NodeKind::Function)[0];
                let callees: Vec<String> = graph
                    .neighbors(foo, Direction::Outgoing, Some(EdgeKind::Calls))
                    .into_iter()
                    .map(|(_, n)| graph.node(n).unwrap().name.clone())
                    .collect();
                assert_eq!(callees, vec!["helper"]);

                let child = graph.by_name_and_kind("Child", NodeKind::Class)[0];
                let parents = graph.neighbors(child, Direction::Outgoing, Some(EdgeKind::Inherits));
                assert_eq!(graph.node(parents[0].1).unwrap().name, "Base");

                let run = graph.by_name_and_kind("run", NodeKind::Function)[0];
                let calls = graph.neighbors(run, Direction::Outgoing, Some(EdgeKind::Calls));
                assert_eq!(graph.node(calls[0].1).unwrap().qualified_name, "Base.setup");

                let module_a = graph
                    .module_by_path(&dir.path().canonicalize().unwrap().join("module_a.py"))
                    .unwrap();
                let imports = graph.neighbors(module_a, Direction::Outgoing, Some(EdgeKind::Imports));
                assert_eq!(imports.len(), 1);
                assert_eq!(
                    graph.node(module_a).unwrap().imports,
                    vec!["math".to_string(), "module_b".to_string()]
                );
            })
            .unwrap();
    }

    #[test]
    fn reindex_is_idempotent() {
        let dir = project();
        let store = GraphStore::in_memory(100);
        let indexer = Indexer::new(&store, IndexOptions::default());
        indexer.index(dir.path(), &IndexControl::new()).unwrap();
        let first = store.stats(None).unwrap();
        indexer.index(dir.path(), &IndexControl::new()).unwrap();
        assert_eq!(store.stats(None).unwrap(), first);
    }

    #[test]
    fn cancelled_run_stops_before_next_chunk() {
        let dir = project();
        let store = GraphStore::in_memory(100);
        let control = IndexControl::new();
        control.cancel();
        let summary = Indexer::new(&store, IndexOptions::default())
            .index(dir.path(), &control)
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.files_indexed, 0);
    }

    #[test]
    fn progress_is_reported() {
        let dir = project();
        let store = GraphStore::in_memory(100);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let control = IndexControl::new().with_progress(move |p| {
            sink.lock().unwrap().push(p.processed_files);
        });
        let options = IndexOptions {
            chunk_size: 1,
            ..IndexOptions::default()
        };
        Indexer::new(&store, options).index(dir.path(), &control).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn absolute_unresolved_keeps_the_written_form() {
        assert_eq!(absolute_unresolved(Path::new("/r/sample/")), PathBuf::from("/r/sample"));
        assert_eq!(absolute_unresolved(Path::new("/r/./sample")), PathBuf::from("/r/sample"));
        let relative = absolute_unresolved(Path::new("sample"));
        assert!(relative.is_absolute() && relative.ends_with("sample"));
    }

    #[test]
    fn missing_path_is_a_validation_error() {
        let store = GraphStore::in_memory(100);
        let err = Indexer::new(&store, IndexOptions::default())
            .index(Path::new("/definitely/not/here"), &IndexControl::new())
            .unwrap_err();
        assert!(matches!(err, CgcError::Validation(_)));
    }
}
