//! Complexity metrics over stored function nodes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CgcError, Result};
use crate::graph::{CodeGraph, NodeData, NodeKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityHit {
    pub function_name: String,
    pub qualified_name: String,
    pub complexity: u32,
    pub file_path: String,
    pub line_number: usize,
}

impl ComplexityHit {
    fn from_node(node: &NodeData) -> Self {
        Self {
            function_name: node.name.clone(),
            qualified_name: node.qualified_name.clone(),
            complexity: node.complexity.unwrap_or(1),
            file_path: node.file_path.display().to_string(),
            line_number: node.line_start,
        }
    }
}

/// True when `file` is `scope` or lies under it, or ends with it as a
/// relative path.
pub(crate) fn path_matches(file: &Path, scope: &Path) -> bool {
    file == scope || file.starts_with(scope) || (scope.is_relative() && file.ends_with(scope))
}

/// Complexity of every function named `function_name`, optionally limited
/// to one file or directory.
pub fn calculate_cyclomatic_complexity(
    graph: &CodeGraph,
    function_name: &str,
    path: Option<&Path>,
) -> Result<Vec<ComplexityHit>> {
    if function_name.trim().is_empty() {
        return Err(CgcError::validation("function_name must not be empty"));
    }
    let mut hits: Vec<ComplexityHit> = graph
        .nodes_of_kind(NodeKind::Function)
        .into_iter()
        .filter_map(|idx| graph.node(idx))
        .filter(|n| n.name == function_name || n.qualified_name == function_name)
        .filter(|n| path.map_or(true, |p| path_matches(&n.file_path, p)))
        .map(ComplexityHit::from_node)
        .collect();
    if hits.is_empty() {
        return Err(CgcError::not_found(format!("Function not found: {function_name}")));
    }
    hits.sort_by(|a, b| (&a.file_path, a.line_number).cmp(&(&b.file_path, b.line_number)));
    Ok(hits)
}

/// The `limit` most complex functions; ties go by name, then file.
pub fn find_most_complex_functions(graph: &CodeGraph, limit: usize) -> Vec<ComplexityHit> {
    let mut hits: Vec<ComplexityHit> = graph
        .nodes_of_kind(NodeKind::Function)
        .into_iter()
        .filter_map(|idx| graph.node(idx))
        .map(ComplexityHit::from_node)
        .collect();
    hits.sort_by(|a, b| {
        b.complexity
            .cmp(&a.complexity)
            .then_with(|| a.function_name.cmp(&b.function_name))
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.line_number.cmp(&b.line_number))
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::tests::node;

    fn function(file: &str, name: &str, complexity: u32) -> NodeData {
        let mut n = node("/r", file, name, NodeKind::Function);
        n.complexity = Some(complexity);
        n
    }

    #[test]
    fn complexity_for_every_match() {
        let mut graph = CodeGraph::new();
        graph.upsert_node(function("/r/a.py", "run", 3));
        graph.upsert_node(function("/r/b.py", "run", 5));

        let all = calculate_cyclomatic_complexity(&graph, "run", None).unwrap();
        assert_eq!(all.iter().map(|h| h.complexity).collect::<Vec<_>>(), vec![3, 5]);

        let scoped = calculate_cyclomatic_complexity(&graph, "run", Some(Path::new("b.py"))).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].complexity, 5);

        assert!(matches!(
            calculate_cyclomatic_complexity(&graph, "missing", None),
            Err(CgcError::NotFound(_))
        ));
    }

    #[test]
    fn most_complex_is_ordered_and_limited() {
        let mut graph = CodeGraph::new();
        graph.upsert_node(function("/r/a.py", "beta", 4));
        graph.upsert_node(function("/r/a.py", "alpha", 4));
        graph.upsert_node(function("/r/a.py", "gamma", 9));
        graph.upsert_node(function("/r/a.py", "delta", 1));

        let top: Vec<String> = find_most_complex_functions(&graph, 3)
            .into_iter()
            .map(|h| h.function_name)
            .collect();
        assert_eq!(top, vec!["gamma", "alpha", "beta"]);
    }
}
