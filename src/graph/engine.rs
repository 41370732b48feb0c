//! The core graph engine.
//!
//! Uses petgraph to store code relationships and keeps natural-key indexes
//! so upserts merge instead of duplicating. A `StableDiGraph` is used so
//! that deleting a repository never invalidates the indexes of the nodes
//! that remain.

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::*;
use crate::error::{CgcError, Result};

/// The code graph: nodes, edges, and the indexes used for lookup.
#[derive(Debug, Default)]
pub struct CodeGraph {
    /// The directed graph storing code relationships.
    graph: StableDiGraph<NodeData, EdgeData>,
    /// Index: natural key -> node index.
    key_index: HashMap<EntityKey, NodeIndex>,
    /// Index: short name -> node indexes (for quick name lookup).
    name_index: HashMap<String, Vec<NodeIndex>>,
    /// Index: file path -> module node.
    file_index: HashMap<PathBuf, NodeIndex>,
}

impl CodeGraph {
    /// Create a new empty code graph.
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Node Operations ────────────────────────────────────────

    /// Insert a node or overwrite the attributes of the node with the same key.
    pub fn upsert_node(&mut self, data: NodeData) -> NodeIndex {
        let key = data.key();
        if let Some(&idx) = self.key_index.get(&key) {
            let old_name = self.graph[idx].name.clone();
            if old_name != data.name {
                self.unindex_name(&old_name, idx);
                self.name_index.entry(data.name.clone()).or_default().push(idx);
            }
            self.graph[idx] = data;
            return idx;
        }

        let name = data.name.clone();
        let is_module = data.kind == NodeKind::Module;
        let file_path = data.file_path.clone();
        let idx = self.graph.add_node(data);
        self.key_index.insert(key, idx);
        self.name_index.entry(name).or_default().push(idx);
        if is_module {
            self.file_index.insert(file_path, idx);
        }
        idx
    }

    /// Add an edge unless one of the same kind already joins the pair.
    /// Returns true when a new edge was created.
    pub fn upsert_edge(&mut self, from: NodeIndex, to: NodeIndex, data: EdgeData) -> bool {
        let existing = self
            .graph
            .edges_directed(from, Direction::Outgoing)
            .find(|e| e.target() == to && e.weight().kind == data.kind)
            .map(|e| e.id());
        match existing {
            Some(edge) => {
                // Keep the earliest line for collapsed repeats.
                if let (Some(weight), Some(line)) = (self.graph.edge_weight_mut(edge), data.line) {
                    weight.line = Some(weight.line.map_or(line, |l| l.min(line)));
                }
                false
            }
            None => {
                self.graph.add_edge(from, to, data);
                true
            }
        }
    }

    /// Upsert a batch of entities. Returns their node indexes in order.
    pub fn upsert_entities(&mut self, entities: Vec<NodeData>) -> Vec<NodeIndex> {
        entities.into_iter().map(|e| self.upsert_node(e)).collect()
    }

    /// Upsert a batch of relationships addressed by natural key.
    ///
    /// Both endpoints must already exist; a missing endpoint is a pipeline
    /// defect and aborts the batch before anything is written.
    pub fn upsert_relationships(&mut self, relationships: &[Relationship]) -> Result<usize> {
        let mut resolved = Vec::with_capacity(relationships.len());
        for rel in relationships {
            let from = self.key_index.get(&rel.source).copied().ok_or_else(|| {
                CgcError::Storage(format!(
                    "dangling {} edge: missing source {}",
                    rel.kind, rel.source.qualified_name
                ))
            })?;
            let to = self.key_index.get(&rel.target).copied().ok_or_else(|| {
                CgcError::Storage(format!(
                    "dangling {} edge: missing target {}",
                    rel.kind, rel.target.qualified_name
                ))
            })?;
            resolved.push((from, to, EdgeData { kind: rel.kind, line: rel.line }));
        }
        let mut created = 0;
        for (from, to, data) in resolved {
            if self.upsert_edge(from, to, data) {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Remove every node indexed under `root` (by repository or file path)
    /// together with its incident edges. Returns the number of removed nodes.
    pub fn remove_repository(&mut self, root: &Path) -> usize {
        let doomed: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                let node = &self.graph[idx];
                node.repo_path == root || node.file_path.starts_with(root)
            })
            .collect();

        for &idx in &doomed {
            if let Some(node) = self.graph.remove_node(idx) {
                self.key_index.remove(&node.key());
                self.unindex_name(&node.name, idx);
                if node.kind == NodeKind::Module {
                    self.file_index.remove(&node.file_path);
                }
            }
        }
        debug!(root = %root.display(), removed = doomed.len(), "removed repository subgraph");
        doomed.len()
    }

    fn unindex_name(&mut self, name: &str, idx: NodeIndex) {
        if let Some(indexes) = self.name_index.get_mut(name) {
            indexes.retain(|&i| i != idx);
            if indexes.is_empty() {
                self.name_index.remove(name);
            }
        }
    }

    // ─── Lookups ────────────────────────────────────────────────

    pub fn node(&self, idx: NodeIndex) -> Option<&NodeData> {
        self.graph.node_weight(idx)
    }

    pub fn edge(&self, idx: EdgeIndex) -> Option<&EdgeData> {
        self.graph.edge_weight(idx)
    }

    pub fn find_by_key(&self, key: &EntityKey) -> Option<NodeIndex> {
        self.key_index.get(key).copied()
    }

    /// All nodes with the given short name, in insertion order.
    pub fn by_name(&self, name: &str) -> Vec<NodeIndex> {
        self.name_index.get(name).cloned().unwrap_or_default()
    }

    /// Nodes of `kind` with the given short name.
    pub fn by_name_and_kind(&self, name: &str, kind: NodeKind) -> Vec<NodeIndex> {
        self.by_name(name)
            .into_iter()
            .filter(|&idx| self.graph[idx].kind == kind)
            .collect()
    }

    pub fn module_by_path(&self, path: &Path) -> Option<NodeIndex> {
        self.file_index.get(path).copied()
    }

    /// Module nodes whose file lies under `dir` (or equals it).
    pub fn modules_under(&self, dir: &Path) -> Vec<NodeIndex> {
        let mut found: Vec<(&PathBuf, NodeIndex)> = self
            .file_index
            .iter()
            .filter(|(path, _)| path.starts_with(dir))
            .map(|(path, &idx)| (path, idx))
            .collect();
        found.sort();
        found.into_iter().map(|(_, idx)| idx).collect()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Nodes of one kind, ordered by file then line for deterministic output.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph[idx].kind == kind)
            .collect();
        nodes.sort_by(|&a, &b| {
            let (na, nb) = (&self.graph[a], &self.graph[b]);
            (&na.file_path, na.line_start, &na.name).cmp(&(&nb.file_path, nb.line_start, &nb.name))
        });
        nodes
    }

    /// Edges leaving (`Outgoing`) or entering (`Incoming`) a node, optionally
    /// filtered by kind. Yields `(edge, other endpoint)`.
    pub fn neighbors(
        &self,
        idx: NodeIndex,
        direction: Direction,
        kind: Option<EdgeKind>,
    ) -> Vec<(EdgeIndex, NodeIndex)> {
        let mut out: Vec<(EdgeIndex, NodeIndex)> = self
            .graph
            .edges_directed(idx, direction)
            .filter(|e| kind.map_or(true, |k| e.weight().kind == k))
            .map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                (e.id(), other)
            })
            .collect();
        // petgraph yields newest edges first; present them in insertion order.
        out.reverse();
        out
    }

    /// Endpoints of an edge as `(source, target)`.
    pub fn edge_endpoints(&self, edge: EdgeIndex) -> Option<(NodeIndex, NodeIndex)> {
        self.graph.edge_endpoints(edge)
    }

    /// The CONTAINS parent of a node, if any.
    pub fn container_of(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.neighbors(idx, Direction::Incoming, Some(EdgeKind::Contains))
            .first()
            .map(|&(_, parent)| parent)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    // ─── Stats ──────────────────────────────────────────────────

    /// Node and edge counts, optionally restricted to one repository.
    pub fn stats(&self, repo: Option<&Path>) -> GraphStats {
        let in_scope = |idx: NodeIndex| {
            repo.map_or(true, |root| self.graph[idx].repo_path == root)
        };

        let mut stats = GraphStats::default();
        for idx in self.graph.node_indices().filter(|&i| in_scope(i)) {
            stats.total_nodes += 1;
            match self.graph[idx].kind {
                NodeKind::Module => stats.modules += 1,
                NodeKind::Function => stats.functions += 1,
                NodeKind::Class => stats.classes += 1,
                NodeKind::Variable => stats.variables += 1,
            }
        }
        for edge in self.graph.edge_indices() {
            let Some((src, _)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            if !in_scope(src) {
                continue;
            }
            stats.total_edges += 1;
            *stats
                .edges_by_kind
                .entry(self.graph[edge].kind.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }

    // ─── Snapshot ───────────────────────────────────────────────

    /// Flatten into positional node/edge lists for persistence.
    pub fn to_snapshot(&self) -> GraphSnapshot {
        let mut position: HashMap<NodeIndex, usize> = HashMap::new();
        let mut nodes = Vec::with_capacity(self.graph.node_count());
        for idx in self.graph.node_indices() {
            position.insert(idx, nodes.len());
            nodes.push(self.graph[idx].clone());
        }
        let edges = self
            .graph
            .edge_indices()
            .filter_map(|edge| {
                let (src, tgt) = self.graph.edge_endpoints(edge)?;
                Some((position[&src], position[&tgt], self.graph[edge]))
            })
            .collect();
        GraphSnapshot { nodes, edges }
    }

    /// Rebuild a graph (and its indexes) from a snapshot.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        let mut graph = CodeGraph::new();
        let indexes: Vec<NodeIndex> = snapshot
            .nodes
            .into_iter()
            .map(|node| graph.upsert_node(node))
            .collect();
        for (src, tgt, data) in snapshot.edges {
            let (Some(&from), Some(&to)) = (indexes.get(src), indexes.get(tgt)) else {
                return Err(CgcError::Storage(format!(
                    "snapshot edge ({src}, {tgt}) points outside the node list"
                )));
            };
            graph.upsert_edge(from, to, data);
        }
        Ok(graph)
    }
}

/// Serializable form of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeData>,
    pub edges: Vec<(usize, usize, EdgeData)>,
}

/// Statistics about the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub modules: usize,
    pub functions: usize,
    pub classes: usize,
    pub variables: usize,
    pub edges_by_kind: BTreeMap<String, usize>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parser::SupportedLanguage;

    pub(crate) fn node(repo: &str, file: &str, qualified: &str, kind: NodeKind) -> NodeData {
        NodeData {
            name: qualified.rsplit('.').next().unwrap_or(qualified).to_string(),
            qualified_name: qualified.to_string(),
            kind,
            repo_path: PathBuf::from(repo),
            file_path: PathBuf::from(file),
            language: SupportedLanguage::Python,
            line_start: 1,
            line_end: 2,
            source: String::new(),
            docstring: None,
            complexity: if kind == NodeKind::Function { Some(1) } else { None },
            args: Vec::new(),
            decorators: Vec::new(),
            bases: Vec::new(),
            imports: Vec::new(),
            scope: None,
            value: None,
            is_method: false,
        }
    }

    #[test]
    fn test_empty_graph() {
        let graph = CodeGraph::new();
        let stats = graph.stats(None);
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.total_edges, 0);
    }

    #[test]
    fn test_upsert_merges_by_natural_key() {
        let mut graph = CodeGraph::new();
        let first = graph.upsert_node(node("/r", "/r/a.py", "foo", NodeKind::Function));
        let mut updated = node("/r", "/r/a.py", "foo", NodeKind::Function);
        updated.complexity = Some(7);
        let second = graph.upsert_node(updated);

        assert_eq!(first, second);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.node(first).unwrap().complexity, Some(7));
        assert_eq!(graph.by_name("foo").len(), 1);
    }

    #[test]
    fn test_same_name_different_kind_is_distinct() {
        let mut graph = CodeGraph::new();
        graph.upsert_node(node("/r", "/r/a.py", "thing", NodeKind::Function));
        graph.upsert_node(node("/r", "/r/a.py", "thing", NodeKind::Class));
        assert_eq!(graph.by_name("thing").len(), 2);
        assert_eq!(graph.by_name_and_kind("thing", NodeKind::Class).len(), 1);
    }

    #[test]
    fn test_repeated_edges_collapse() {
        let mut graph = CodeGraph::new();
        let a = graph.upsert_node(node("/r", "/r/a.py", "a", NodeKind::Function));
        let b = graph.upsert_node(node("/r", "/r/a.py", "b", NodeKind::Function));
        assert!(graph.upsert_edge(a, b, EdgeData::at_line(EdgeKind::Calls, 9)));
        assert!(!graph.upsert_edge(a, b, EdgeData::at_line(EdgeKind::Calls, 4)));
        assert!(graph.upsert_edge(a, b, EdgeData::new(EdgeKind::Contains)));
        assert_eq!(graph.edge_count(), 2);

        let calls = graph.neighbors(a, Direction::Outgoing, Some(EdgeKind::Calls));
        assert_eq!(calls.len(), 1);
        assert_eq!(graph.edge(calls[0].0).unwrap().line, Some(4));
    }

    #[test]
    fn test_relationships_reject_missing_endpoints() {
        let mut graph = CodeGraph::new();
        let a = node("/r", "/r/a.py", "a", NodeKind::Function);
        let ghost = node("/r", "/r/b.py", "ghost", NodeKind::Function);
        graph.upsert_node(a.clone());

        let rel = Relationship {
            source: a.key(),
            target: ghost.key(),
            kind: EdgeKind::Calls,
            line: None,
        };
        assert!(graph.upsert_relationships(&[rel]).is_err());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_remove_repository_drops_incident_edges() {
        let mut graph = CodeGraph::new();
        let a = graph.upsert_node(node("/r1", "/r1/a.py", "a", NodeKind::Function));
        let b = graph.upsert_node(node("/r2", "/r2/b.py", "b", NodeKind::Function));
        graph.upsert_edge(b, a, EdgeData::new(EdgeKind::Calls));

        assert_eq!(graph.remove_repository(Path::new("/r1")), 1);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.by_name("a").is_empty());
        assert_eq!(graph.by_name("b"), vec![b]);
    }

    #[test]
    fn test_remove_unknown_repository_is_noop() {
        let mut graph = CodeGraph::new();
        assert_eq!(graph.remove_repository(Path::new("/nowhere")), 0);
    }

    #[test]
    fn test_snapshot_round_trip_preserves_stats() {
        let mut graph = CodeGraph::new();
        let m = graph.upsert_node(node("/r", "/r/a.py", "a", NodeKind::Module));
        let f = graph.upsert_node(node("/r", "/r/a.py", "foo", NodeKind::Function));
        graph.upsert_edge(m, f, EdgeData::new(EdgeKind::Contains));

        let restored = CodeGraph::from_snapshot(graph.to_snapshot()).unwrap();
        assert_eq!(restored.stats(None), graph.stats(None));
        assert!(restored.module_by_path(Path::new("/r/a.py")).is_some());
    }
}
