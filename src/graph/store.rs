//! Graph store adapter, the single shared mutable resource.
//!
//! Writers take the graph lock for one batch at a time so readers interleave
//! with a running index. Runs over overlapping roots (the same path, or one
//! nested inside the other) are serialized through
//! [`GraphStore::lock_repository`]; disjoint repositories proceed
//! concurrently.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, RwLock};
use tracing::{debug, info};

use super::engine::{CodeGraph, GraphStats};
use super::types::{EntityBatch, NodeData, Relationship};
use crate::error::{CgcError, Result};
use crate::query::cypher::{self, QueryOutput};

pub struct GraphStore {
    graph: RwLock<CodeGraph>,
    active_repos: Mutex<HashSet<PathBuf>>,
    repo_released: Condvar,
    snapshot_path: Option<PathBuf>,
    max_query_rows: usize,
}

/// Held while a repository is being (re)indexed.
pub struct RepoGuard<'a> {
    store: &'a GraphStore,
    path: PathBuf,
}

impl Drop for RepoGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.store.active_repos.lock() {
            active.remove(&self.path);
        }
        self.store.repo_released.notify_all();
    }
}

impl GraphStore {
    /// A store that never touches disk.
    pub fn in_memory(max_query_rows: usize) -> Self {
        Self::with_graph(CodeGraph::new(), None, max_query_rows)
    }

    /// Open the store backed by the snapshot at `snapshot_path`.
    pub fn open(snapshot_path: PathBuf, max_query_rows: usize) -> Self {
        let graph = CodeGraph::load_or_empty(&snapshot_path);
        Self::with_graph(graph, Some(snapshot_path), max_query_rows)
    }

    fn with_graph(graph: CodeGraph, snapshot_path: Option<PathBuf>, max_query_rows: usize) -> Self {
        Self {
            graph: RwLock::new(graph),
            active_repos: Mutex::new(HashSet::new()),
            repo_released: Condvar::new(),
            snapshot_path,
            max_query_rows,
        }
    }

    /// Run `f` against a consistent read view of the graph.
    pub fn read<T>(&self, f: impl FnOnce(&CodeGraph) -> T) -> Result<T> {
        let graph = self.graph.read().map_err(|_| CgcError::poisoned("graph"))?;
        Ok(f(&graph))
    }

    fn write<T>(&self, f: impl FnOnce(&mut CodeGraph) -> T) -> Result<T> {
        let mut graph = self.graph.write().map_err(|_| CgcError::poisoned("graph"))?;
        Ok(f(&mut graph))
    }

    /// Merge entities by natural key. Returns how many were written.
    pub fn upsert_entities(&self, entities: Vec<NodeData>) -> Result<usize> {
        self.write(|graph| graph.upsert_entities(entities).len())
    }

    /// Merge relationships by (source, target, kind). Returns how many are new.
    pub fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<usize> {
        self.write(|graph| graph.upsert_relationships(relationships))?
    }

    /// Apply a batch as one unit: entities first, then the relationships
    /// between them, under a single write lock.
    pub fn commit_batch(&self, batch: EntityBatch) -> Result<usize> {
        let EntityBatch {
            entities,
            relationships,
        } = batch;
        self.write(|graph| {
            graph.upsert_entities(entities);
            graph.upsert_relationships(&relationships)
        })?
    }

    /// Remove everything indexed under `path`. Succeeds with 0 when nothing was.
    pub fn delete_repository(&self, path: &Path) -> Result<usize> {
        let removed = self.write(|graph| graph.remove_repository(path))?;
        info!(repo = %path.display(), removed, "repository deleted from graph");
        Ok(removed)
    }

    /// Execute query text after checking that it cannot modify the graph.
    pub fn execute_read_only(&self, query_text: &str) -> Result<QueryOutput> {
        let statement = cypher::parse_read_only(query_text)?;
        self.read(|graph| cypher::execute(graph, &statement, self.max_query_rows))?
    }

    /// Block until no run holds `path` or a path overlapping it, then claim it.
    pub fn lock_repository(&self, path: &Path) -> Result<RepoGuard<'_>> {
        let mut active = self
            .active_repos
            .lock()
            .map_err(|_| CgcError::poisoned("repository"))?;
        while let Some(holder) = active.iter().find(|held| overlaps(held, path)) {
            debug!(repo = %path.display(), holder = %holder.display(), "waiting for overlapping index");
            active = self
                .repo_released
                .wait(active)
                .map_err(|_| CgcError::poisoned("repository"))?;
        }
        active.insert(path.to_path_buf());
        Ok(RepoGuard {
            store: self,
            path: path.to_path_buf(),
        })
    }

    /// Claim `path` without waiting. Fails with [`CgcError::Busy`] while an
    /// overlapping run holds it.
    pub fn try_lock_repository(&self, path: &Path) -> Result<RepoGuard<'_>> {
        let mut active = self
            .active_repos
            .lock()
            .map_err(|_| CgcError::poisoned("repository"))?;
        if let Some(holder) = active.iter().find(|held| overlaps(held, path)) {
            return Err(CgcError::Busy(format!(
                "Repository {} is being indexed; cancel the job or retry once it finishes",
                holder.display()
            )));
        }
        active.insert(path.to_path_buf());
        Ok(RepoGuard {
            store: self,
            path: path.to_path_buf(),
        })
    }

    pub fn stats(&self, repo: Option<&Path>) -> Result<GraphStats> {
        self.read(|graph| graph.stats(repo))
    }

    /// Flush the graph to its snapshot file (no-op for in-memory stores).
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        self.read(|graph| graph.save(path))??;
        debug!(snapshot = %path.display(), "graph persisted");
        Ok(())
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::tests::node;
    use crate::graph::types::{EdgeKind, NodeKind};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn commit_batch_is_idempotent() {
        let store = GraphStore::in_memory(100);
        let module = node("/r", "/r/a.py", "a", NodeKind::Module);
        let func = node("/r", "/r/a.py", "foo", NodeKind::Function);
        let batch = EntityBatch {
            entities: vec![module.clone(), func.clone()],
            relationships: vec![Relationship {
                source: module.key(),
                target: func.key(),
                kind: EdgeKind::Contains,
                line: Some(1),
            }],
        };
        store.commit_batch(batch.clone()).unwrap();
        store.commit_batch(batch).unwrap();

        let stats = store.stats(None).unwrap();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.total_edges, 1);
    }

    #[test]
    fn write_queries_are_rejected() {
        let store = GraphStore::in_memory(100);
        let err = store
            .execute_read_only("CREATE (n:TestNode) RETURN n")
            .unwrap_err();
        assert!(matches!(err, CgcError::WriteRejected(_)));
    }

    #[test]
    fn repository_lock_serializes_same_path() {
        let store = Arc::new(GraphStore::in_memory(100));
        let guard = store.lock_repository(Path::new("/r")).unwrap();

        let other = Arc::clone(&store);
        let waiter = std::thread::spawn(move || {
            let _guard = other.lock_repository(Path::new("/r")).unwrap();
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        // A different repository is not blocked.
        let _unrelated = store.lock_repository(Path::new("/other")).unwrap();

        drop(guard);
        waiter.join().unwrap();
    }

    #[test]
    fn nested_roots_contend_for_the_same_lock() {
        let store = Arc::new(GraphStore::in_memory(100));
        let guard = store.lock_repository(Path::new("/r")).unwrap();
        assert!(matches!(
            store.try_lock_repository(Path::new("/r/sub")),
            Err(CgcError::Busy(_))
        ));
        assert!(store.try_lock_repository(Path::new("/")).is_err());
        // Sibling with a shared name prefix is disjoint.
        drop(store.try_lock_repository(Path::new("/rr")).unwrap());

        let other = Arc::clone(&store);
        let waiter = std::thread::spawn(move || {
            let _guard = other.lock_repository(Path::new("/r/sub")).unwrap();
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.join().unwrap();
        drop(store.try_lock_repository(Path::new("/r")).unwrap());
    }

    #[test]
    fn persist_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        let store = GraphStore::open(path.clone(), 100);
        store
            .upsert_entities(vec![node("/r", "/r/a.py", "a", NodeKind::Module)])
            .unwrap();
        store.persist().unwrap();

        let reopened = GraphStore::open(path, 100);
        assert_eq!(reopened.stats(None).unwrap().modules, 1);
    }
}
