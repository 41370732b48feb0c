//! The tool surface as a plain Rust API.
//!
//! [`CodeGraphService`] owns the store, the registry and the job manager, and
//! is what both the MCP server and the CLI drive.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::CgcConfig;
use crate::error::{CgcError, Result};
use crate::graph::{GraphStats, GraphStore};
use crate::indexer::{absolute_unresolved, canonical_root, IndexControl, IndexOptions, IndexSummary, Indexer};
use crate::jobs::{IndexRunner, JobInfo, JobManager, Submission};
use crate::query::{self, ComplexityHit, DeadCodeReport, QueryOutput, QueryType, SearchHit};
use crate::registry::{Registry, RepositoryRecord};

/// Runs the indexing pipeline for jobs and records the outcome.
struct PipelineRunner {
    store: Arc<GraphStore>,
    registry: Arc<Registry>,
    options: IndexOptions,
    persist: bool,
}

impl PipelineRunner {
    /// Index `path`, or the recorded repository that already contains it.
    /// The repository lock is held until the registry reflects the run, so
    /// an overlapping run always sees this one's record.
    fn index(&self, path: &Path, control: &IndexControl, job_id: Option<&str>) -> Result<IndexSummary> {
        let requested = canonical_root(path)?;
        let mut root = requested.clone();
        let guard = loop {
            let guard = self.store.lock_repository(&root)?;
            match self.registry.enclosing_root(&root)? {
                Some(outer) => {
                    info!(
                        path = %requested.display(),
                        repo = %outer.display(),
                        "path lies inside an indexed repository, re-indexing that repository"
                    );
                    drop(guard);
                    root = outer;
                }
                None => break guard,
            }
        };

        let summary = Indexer::new(&self.store, self.options.clone()).replace(&root, control)?;
        let alias = (root == requested).then(|| absolute_unresolved(path));
        self.registry.record_index(&summary, job_id, alias.as_deref())?;
        for absorbed in self.registry.remove_nested(&root)? {
            info!(repo = %root.display(), nested = %absorbed.path.display(), "absorbed nested repository");
        }
        drop(guard);

        if self.persist {
            self.store.persist()?;
        }
        Ok(summary)
    }
}

impl IndexRunner for PipelineRunner {
    fn run(&self, path: &Path, control: &IndexControl, job_id: &str) -> Result<IndexSummary> {
        self.index(path, control, Some(job_id))
    }
}

pub struct CodeGraphService {
    config: CgcConfig,
    store: Arc<GraphStore>,
    runner: Arc<PipelineRunner>,
    jobs: JobManager,
}

impl CodeGraphService {
    /// Open the persistent store and registry under `config.data_dir`.
    pub fn open(config: CgcConfig) -> Result<Self> {
        if !config.persist {
            return Ok(Self::in_memory(config));
        }
        let data_dir = config.resolved_data_dir();
        std::fs::create_dir_all(&data_dir)?;
        let store = GraphStore::open(config.snapshot_path(), config.max_query_rows);
        let registry = Registry::open(config.registry_path());
        info!(data_dir = %data_dir.display(), "code graph opened");
        Ok(Self::assemble(config, store, registry))
    }

    /// A service that keeps everything in memory.
    pub fn in_memory(mut config: CgcConfig) -> Self {
        config.persist = false;
        let store = GraphStore::in_memory(config.max_query_rows);
        Self::assemble(config, store, Registry::in_memory())
    }

    fn assemble(config: CgcConfig, store: GraphStore, registry: Registry) -> Self {
        let store = Arc::new(store);
        let runner = Arc::new(PipelineRunner {
            store: Arc::clone(&store),
            registry: Arc::new(registry),
            options: IndexOptions::from(&config),
            persist: config.persist,
        });
        let jobs = JobManager::new(runner.clone(), config.workers);
        Self {
            config,
            store,
            runner,
            jobs,
        }
    }

    pub fn config(&self) -> &CgcConfig {
        &self.config
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    // ─── Indexing and jobs ──────────────────────────────────────

    /// Queue a background index of `path`. Requires a tokio runtime.
    pub fn add_code_to_graph(&self, path: &Path) -> Result<Submission> {
        require_path(path)?;
        self.jobs.submit(path)
    }

    /// Index `path` on the calling thread, outside the job table.
    pub fn index_now(&self, path: &Path) -> Result<IndexSummary> {
        require_path(path)?;
        self.runner.index(path, &IndexControl::new(), None)
    }

    pub fn check_job_status(&self, job_id: &str) -> Result<JobInfo> {
        self.jobs.status(job_id.trim())
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<JobInfo> {
        self.jobs.cancel(job_id.trim())
    }

    pub fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        self.jobs.list()
    }

    pub async fn wait_for_job(&self, job_id: &str, timeout: Duration) -> Result<JobInfo> {
        self.jobs.wait(job_id, timeout).await
    }

    // ─── Repositories ───────────────────────────────────────────

    /// Drop a repository's subgraph and registry entry. Returns the number
    /// of removed nodes; 0 for a path that was never indexed. Fails with
    /// [`CgcError::Busy`] instead of waiting while an index of the
    /// repository is running.
    pub fn delete_repository(&self, path: &Path) -> Result<usize> {
        require_path(path)?;
        let root = self.resolve_root(path)?;
        let registry = &self.runner.registry;
        if let Some(outer) = registry.enclosing_root(&root)? {
            return Err(CgcError::validation(format!(
                "{} lies inside indexed repository {}; delete or re-index that repository instead",
                root.display(),
                outer.display()
            )));
        }
        let (removed, forgotten) = {
            let _guard = self.store.try_lock_repository(&root)?;
            let removed = self.store.delete_repository(&root)?;
            let record = registry.remove(&root)?;
            let nested = registry.remove_nested(&root)?;
            (removed, record.is_some() || !nested.is_empty())
        };
        if removed > 0 || forgotten {
            self.persist();
        }
        Ok(removed)
    }

    pub fn list_indexed_repositories(&self) -> Result<Vec<RepositoryRecord>> {
        self.runner.registry.list()
    }

    pub fn repository_stats(&self, repo: Option<&Path>) -> Result<GraphStats> {
        match repo {
            Some(path) => {
                let root = self.resolve_root(path)?;
                if self.runner.registry.get(&root)?.is_none() {
                    return Err(CgcError::not_found(format!(
                        "Repository {} is not indexed",
                        root.display()
                    )));
                }
                self.store.stats(Some(&root))
            }
            None => self.store.stats(None),
        }
    }

    /// The recorded root `path` names, by canonical form or by the spelling
    /// it was indexed through; otherwise `path` made absolute.
    fn resolve_root(&self, path: &Path) -> Result<PathBuf> {
        let canonical = absolute(path);
        for candidate in [canonical.clone(), absolute_unresolved(path)] {
            if let Some(record) = self.runner.registry.lookup(&candidate)? {
                return Ok(record.path);
            }
        }
        Ok(canonical)
    }

    // ─── Queries ────────────────────────────────────────────────

    pub fn find_code(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchHit>> {
        let limit = limit.unwrap_or(self.config.search_limit).max(1);
        self.store.read(|graph| query::find_code(graph, query, limit))?
    }

    pub fn analyze_code_relationships(
        &self,
        query_type: &str,
        target: &str,
        context: Option<&str>,
    ) -> Result<Value> {
        let query_type: QueryType = query_type.parse()?;
        self.store
            .read(|graph| query::analyze(graph, query_type, target, context))?
    }

    pub fn list_imports(&self, path: &Path) -> Result<Vec<String>> {
        query::list_imports(&self.store, path)
    }

    pub fn find_dead_code(&self, exclude_decorated_with: &[String]) -> Result<DeadCodeReport> {
        self.store
            .read(|graph| query::find_dead_code(graph, exclude_decorated_with))
    }

    pub fn calculate_cyclomatic_complexity(
        &self,
        function_name: &str,
        path: Option<&Path>,
    ) -> Result<Vec<ComplexityHit>> {
        self.store.read(|graph| {
            query::calculate_cyclomatic_complexity(graph, function_name, path)
        })?
    }

    pub fn find_most_complex_functions(&self, limit: usize) -> Result<Vec<ComplexityHit>> {
        self.store
            .read(|graph| query::find_most_complex_functions(graph, limit))
    }

    pub fn execute_cypher_query(&self, text: &str) -> Result<QueryOutput> {
        self.store.execute_read_only(text)
    }

    /// Cancel running jobs and flush state to disk.
    pub fn shutdown(&self) {
        self.jobs.shutdown();
        self.persist();
    }

    fn persist(&self) {
        if !self.config.persist {
            return;
        }
        if let Err(e) = self.store.persist() {
            warn!(error = %e, "failed to persist graph");
        }
    }
}

fn require_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        Err(CgcError::validation("path must not be empty"))
    } else {
        Ok(())
    }
}

/// Canonical form when the path exists, otherwise absolute against the cwd.
fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| absolute_unresolved(path))
}
