//! Unreferenced functions and classes.
//!
//! A function is a candidate when nothing CALLS it; a class when nothing
//! CALLS (instantiates) or INHERITS from it. Calls made through dynamic
//! dispatch (`getattr`, handler tables) are invisible to the graph, so those
//! targets show up here as false positives.

use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::graph::{CodeGraph, EdgeKind, NodeData, NodeKind};

const ENTRY_POINTS: &[&str] = &["main", "setUp", "tearDown", "setUpClass", "tearDownClass"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadCodeHit {
    pub name: String,
    pub qualified_name: String,
    pub kind: NodeKind,
    pub file_path: String,
    pub line_number: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadCodeReport {
    pub potentially_unused_functions: Vec<DeadCodeHit>,
    pub potentially_unused_classes: Vec<DeadCodeHit>,
    pub note: String,
}

/// Decorator name without `@`, call arguments, or module prefix.
pub(crate) fn decorator_name(decorator: &str) -> &str {
    let bare = decorator.trim_start_matches('@');
    let bare = bare.split('(').next().unwrap_or(bare).trim();
    bare.rsplit('.').next().unwrap_or(bare)
}

fn is_entry_point(node: &NodeData, excluded_decorators: &[String]) -> bool {
    let name = node.name.as_str();
    if ENTRY_POINTS.contains(&name) || name.starts_with("test_") || (name.starts_with("test") && node.is_method) {
        return true;
    }
    if name.len() > 4 && name.starts_with("__") && name.ends_with("__") {
        return true;
    }
    node.decorators
        .iter()
        .any(|d| excluded_decorators.iter().any(|ex| decorator_name(d) == decorator_name(ex)))
}

pub fn find_dead_code(graph: &CodeGraph, exclude_decorated_with: &[String]) -> DeadCodeReport {
    let unreferenced = |kind: NodeKind, incoming: &[EdgeKind]| -> Vec<DeadCodeHit> {
        graph
            .nodes_of_kind(kind)
            .into_iter()
            .filter(|&idx| {
                incoming
                    .iter()
                    .all(|&k| graph.neighbors(idx, Direction::Incoming, Some(k)).is_empty())
            })
            .filter_map(|idx| graph.node(idx))
            .filter(|node| !is_entry_point(node, exclude_decorated_with))
            .map(|node| DeadCodeHit {
                name: node.name.clone(),
                qualified_name: node.qualified_name.clone(),
                kind: node.kind,
                file_path: node.file_path.display().to_string(),
                line_number: node.line_start,
            })
            .collect()
    };

    DeadCodeReport {
        potentially_unused_functions: unreferenced(NodeKind::Function, &[EdgeKind::Calls]),
        potentially_unused_classes: unreferenced(
            NodeKind::Class,
            &[EdgeKind::Calls, EdgeKind::Inherits],
        ),
        note: "Candidates only: functions reached through dynamic dispatch are not visible to the call graph."
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::tests::node;
    use crate::graph::EdgeData;

    #[test]
    fn unreferenced_symbols_are_reported() {
        let mut graph = CodeGraph::new();
        let used = graph.upsert_node(node("/r", "/r/a.py", "used", NodeKind::Function));
        let caller = graph.upsert_node(node("/r", "/r/a.py", "caller", NodeKind::Function));
        graph.upsert_edge(caller, used, EdgeData::new(EdgeKind::Calls));
        graph.upsert_node(node("/r", "/r/a.py", "main", NodeKind::Function));
        graph.upsert_node(node("/r", "/r/a.py", "__init__", NodeKind::Function));
        graph.upsert_node(node("/r", "/r/a.py", "test_caller", NodeKind::Function));
        let mut routed = node("/r", "/r/a.py", "index", NodeKind::Function);
        routed.decorators = vec!["@app.route('/')".to_string()];
        graph.upsert_node(routed);

        let base = graph.upsert_node(node("/r", "/r/a.py", "Base", NodeKind::Class));
        let child = graph.upsert_node(node("/r", "/r/a.py", "Child", NodeKind::Class));
        graph.upsert_edge(child, base, EdgeData::new(EdgeKind::Inherits));

        let report = find_dead_code(&graph, &["app.route".to_string()]);
        let functions: Vec<&str> = report
            .potentially_unused_functions
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(functions, vec!["caller"]);
        let classes: Vec<&str> = report
            .potentially_unused_classes
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(classes, vec!["Child"]);

        let without_exclusion = find_dead_code(&graph, &[]);
        assert_eq!(without_exclusion.potentially_unused_functions.len(), 2);
    }

    #[test]
    fn decorator_names_normalise() {
        assert_eq!(decorator_name("@app.route('/x')"), "route");
        assert_eq!(decorator_name("staticmethod"), "staticmethod");
    }
}
