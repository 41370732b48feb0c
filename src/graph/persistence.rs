//! Graph snapshot persistence (bincode on disk).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::engine::{CodeGraph, GraphSnapshot};
use crate::error::Result;

/// Bumped whenever `NodeData`/`EdgeData` change shape.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    graph: GraphSnapshot,
}

impl CodeGraph {
    /// Write the graph to `path` atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            graph: self.to_snapshot(),
        };
        let bytes = bincode::serialize(&file)?;
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a graph previously written by [`CodeGraph::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let file: SnapshotFile = bincode::deserialize(&bytes)?;
        if file.version != SNAPSHOT_VERSION {
            return Err(crate::error::CgcError::Storage(format!(
                "snapshot version {} is not supported (expected {})",
                file.version, SNAPSHOT_VERSION
            )));
        }
        CodeGraph::from_snapshot(file.graph)
    }

    /// Load from `path` if present; an unreadable snapshot yields an empty graph.
    pub fn load_or_empty(path: &Path) -> Self {
        if !path.exists() {
            return CodeGraph::new();
        }
        match CodeGraph::load(path) {
            Ok(graph) => {
                info!(
                    snapshot = %path.display(),
                    nodes = graph.node_count(),
                    edges = graph.edge_count(),
                    "graph loaded from snapshot"
                );
                graph
            }
            Err(e) => {
                warn!(snapshot = %path.display(), error = %e, "snapshot unreadable, starting empty");
                CodeGraph::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::tests::node;
    use crate::graph::types::{EdgeData, EdgeKind, NodeKind};

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.bin");

        let mut graph = CodeGraph::new();
        let m = graph.upsert_node(node("/r", "/r/a.py", "a", NodeKind::Module));
        let f = graph.upsert_node(node("/r", "/r/a.py", "foo", NodeKind::Function));
        graph.upsert_edge(m, f, EdgeData::at_line(EdgeKind::Contains, 3));
        graph.save(&path).unwrap();

        let loaded = CodeGraph::load(&path).unwrap();
        assert_eq!(loaded.node_count(), 2);
        assert_eq!(loaded.edge_count(), 1);
        assert_eq!(loaded.by_name("foo").len(), 1);
    }

    #[test]
    fn corrupt_snapshot_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        fs::write(&path, b"definitely not bincode").unwrap();
        assert_eq!(CodeGraph::load_or_empty(&path).node_count(), 0);
    }
}
