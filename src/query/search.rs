//! Ranked symbol search.

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::error::{CgcError, Result};
use crate::graph::{CodeGraph, NodeData, NodeKind};

/// Longest `source` excerpt returned with a hit.
const SOURCE_PREVIEW_CHARS: usize = 1200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub kind: NodeKind,
    pub file_path: String,
    pub line_number: usize,
    pub qualified_name: String,
    pub score: u32,
    pub source: String,
    pub docstring: Option<String>,
}

/// Best score of `node` against `query`, or `None` when nothing matches.
///
/// exact name > case-insensitive exact > prefix > qualified name >
/// substring > argument > docstring.
fn score(node: &NodeData, query: &str, query_lower: &str) -> Option<u32> {
    let name_lower = node.name.to_lowercase();
    if node.name == query {
        return Some(100);
    }
    if name_lower == query_lower {
        return Some(90);
    }
    if name_lower.starts_with(query_lower) {
        return Some(75);
    }
    if node.qualified_name.to_lowercase().contains(query_lower) && node.qualified_name != node.name {
        return Some(60);
    }
    if name_lower.contains(query_lower) {
        return Some(50);
    }
    if node.args.iter().any(|a| a.to_lowercase().contains(query_lower)) {
        return Some(30);
    }
    if node
        .docstring
        .as_deref()
        .is_some_and(|d| d.to_lowercase().contains(query_lower))
    {
        return Some(20);
    }
    None
}

/// Search every entity for `query`, best matches first.
pub fn find_code(graph: &CodeGraph, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CgcError::validation("query must not be empty"));
    }
    let query_lower = query.to_lowercase();

    let mut scored: Vec<(u32, NodeIndex)> = graph
        .node_indices()
        .filter_map(|idx| {
            let node = graph.node(idx)?;
            score(node, query, &query_lower).map(|s| (s, idx))
        })
        .collect();

    scored.sort_by(|&(sa, a), &(sb, b)| {
        let (na, nb) = (graph.node(a), graph.node(b));
        sb.cmp(&sa).then_with(|| match (na, nb) {
            (Some(na), Some(nb)) => (&na.name, &na.file_path, na.line_start)
                .cmp(&(&nb.name, &nb.file_path, nb.line_start)),
            _ => std::cmp::Ordering::Equal,
        })
    });

    Ok(scored
        .into_iter()
        .take(limit.max(1))
        .filter_map(|(score, idx)| {
            let node = graph.node(idx)?;
            Some(SearchHit {
                name: node.name.clone(),
                kind: node.kind,
                file_path: node.file_path.display().to_string(),
                line_number: node.line_start,
                qualified_name: node.qualified_name.clone(),
                score,
                source: crate::parser::truncate(&node.source, SOURCE_PREVIEW_CHARS),
                docstring: node.docstring.clone(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::tests::node;

    fn graph() -> CodeGraph {
        let mut graph = CodeGraph::new();
        graph.upsert_node(node("/r", "/r/a.py", "foo", NodeKind::Function));
        graph.upsert_node(node("/r", "/r/a.py", "foobar", NodeKind::Function));
        graph.upsert_node(node("/r", "/r/b.py", "Foo", NodeKind::Class));
        graph.upsert_node(node("/r", "/r/b.py", "do_foo", NodeKind::Function));
        let mut with_arg = node("/r", "/r/c.py", "process", NodeKind::Function);
        with_arg.args = vec!["foo_count".to_string()];
        graph.upsert_node(with_arg);
        let mut documented = node("/r", "/r/c.py", "other", NodeKind::Function);
        documented.docstring = Some("Calls FOO twice.".to_string());
        graph.upsert_node(documented);
        graph.upsert_node(node("/r", "/r/c.py", "unrelated", NodeKind::Function));
        graph
    }

    #[test]
    fn exact_match_ranks_first() {
        let hits = find_code(&graph(), "foo", 10).unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "Foo", "foobar", "do_foo", "process", "other"]);
        assert_eq!(hits[0].score, 100);
        assert_eq!(hits[0].file_path, "/r/a.py");
    }

    #[test]
    fn limit_and_empty_query() {
        assert_eq!(find_code(&graph(), "foo", 2).unwrap().len(), 2);
        assert!(matches!(find_code(&graph(), "  ", 5), Err(CgcError::Validation(_))));
        assert!(find_code(&graph(), "zzz", 5).unwrap().is_empty());
    }
}
