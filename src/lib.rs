//! # cgc
//!
//! Code graph indexing and query engine. Source trees are parsed into a
//! graph of modules, functions, classes and variables linked by CONTAINS,
//! CALLS, IMPORTS and INHERITS relationships, which agents then query over
//! MCP.
//!
//! ## Key Features
//!
//! - **Background indexing**: jobs with progress, cancellation and
//!   duplicate-path coalescing
//! - **Full-replace re-indexing**: indexing a path twice yields the same graph
//! - **Relationship analysis**: callers, callees, call chains, class
//!   hierarchies, importers, dead code, cyclomatic complexity
//! - **Read-only Cypher**: ad-hoc `MATCH ... RETURN` queries; writes are refused
//! - **Multi-language**: Python, JavaScript, TypeScript
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cgc::{CgcConfig, CodeGraphService};
//! use std::path::Path;
//!
//! let service = CodeGraphService::in_memory(CgcConfig::default());
//! service.index_now(Path::new("./my_project")).unwrap();
//!
//! let callers = service
//!     .analyze_code_relationships("find_callers", "helper", None)
//!     .unwrap();
//! let rows = service
//!     .execute_cypher_query("MATCH (f:Function) RETURN f.name AS name LIMIT 5")
//!     .unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod jobs;
pub mod mcp;
pub mod parser;
pub mod query;
pub mod registry;
pub mod service;

pub use config::CgcConfig;
pub use error::{CgcError, Result};
pub use graph::{CodeGraph, EdgeKind, GraphStats, GraphStore, NodeKind};
pub use indexer::{IndexSummary, Indexer};
pub use jobs::{JobInfo, JobManager, JobStatus};
pub use parser::SupportedLanguage;
pub use query::{QueryOutput, QueryType};
pub use registry::{Registry, RepositoryRecord};
pub use service::CodeGraphService;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};

    fn sample_project() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("sample_project")
            .canonicalize()
            .unwrap()
    }

    fn indexed() -> (CodeGraphService, PathBuf) {
        let root = sample_project();
        let service = CodeGraphService::in_memory(CgcConfig::default());
        service.index_now(&root).unwrap();
        (service, root)
    }

    fn field_set(rows: &Value, key: &str) -> HashSet<String> {
        rows.as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r[key].as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_callers_and_callees() {
        let (service, root) = indexed();

        let callers = service
            .analyze_code_relationships("find_callers", "helper", None)
            .unwrap();
        let names = field_set(&callers, "caller_function");
        assert!(names.contains("foo"));
        assert!(names.contains("call_helper_twice"));

        let module_a = root.join("module_a.py");
        let callees = service
            .analyze_code_relationships("find_callees", "foo", module_a.to_str())
            .unwrap();
        let names = field_set(&callees, "called_function");
        assert!(names.contains("helper"));
        assert!(names.contains("process_data"));
    }

    #[test]
    fn test_class_hierarchy_is_transitive() {
        let (service, root) = indexed();
        let classes = root.join("advanced_classes.py");

        let c = service
            .analyze_code_relationships("class_hierarchy", "C", classes.to_str())
            .unwrap();
        let parents = field_set(&c["parent_classes"], "parent_class");
        assert!(parents.contains("A") && parents.contains("B"));

        let d = service
            .analyze_code_relationships("class_hierarchy", "D", None)
            .unwrap();
        let depths: Vec<(String, u64)> = d["parent_classes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| (p["parent_class"].as_str().unwrap().to_string(), p["depth"].as_u64().unwrap()))
            .collect();
        assert!(depths.contains(&("C".to_string(), 1)));
        assert!(depths.contains(&("A".to_string(), 2)));
        assert!(depths.contains(&("B".to_string(), 2)));
    }

    #[test]
    fn test_imports_and_module_deps() {
        let (service, root) = indexed();

        let importers = service
            .analyze_code_relationships("find_importers", "module_b", None)
            .unwrap();
        let files = field_set(&importers, "file_name");
        assert!(files.contains("module_a.py"));
        assert!(files.contains("submodule1.py"));

        let deps = service
            .analyze_code_relationships("module_deps", "module_a", None)
            .unwrap();
        assert_eq!(deps["module_name"], "module_a");

        let imports = service.list_imports(&root.join("module_a.py")).unwrap();
        assert!(imports.contains(&"math".to_string()));
        assert!(imports.contains(&"module_b".to_string()));
    }

    #[test]
    fn test_complexity_of_try_except_finally() {
        let (service, _) = indexed();
        let hits = service
            .calculate_cyclomatic_complexity("try_except_finally", None)
            .unwrap();
        assert_eq!(hits[0].complexity, 4);

        let top = service.find_most_complex_functions(5).unwrap();
        assert_eq!(top[0].function_name, "try_except_finally");
    }

    #[test]
    fn test_find_code_ranks_exact_names_first() {
        let (service, _) = indexed();
        let hits = service.find_code("foo", None).unwrap();
        assert_eq!(hits[0].name, "foo");
        assert!(hits[0].file_path.ends_with("module_a.py"));

        let hits = service.find_code("Dummy", None).unwrap();
        assert!(hits
            .iter()
            .any(|h| h.name == "Dummy" && h.file_path.ends_with("advanced_calls.py")));
    }

    #[test]
    fn test_reindex_is_idempotent() {
        let (service, root) = indexed();
        let first = service.repository_stats(Some(&root)).unwrap();
        service.index_now(&root).unwrap();
        let second = service.repository_stats(Some(&root)).unwrap();
        assert_eq!(first, second);
        assert_eq!(service.list_indexed_repositories().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_removes_everything_under_root() {
        let (service, root) = indexed();
        assert!(service.delete_repository(&root).unwrap() > 0);

        assert!(service.list_indexed_repositories().unwrap().is_empty());
        assert!(service
            .find_code("helper", None)
            .unwrap()
            .iter()
            .all(|h| !Path::new(&h.file_path).starts_with(&root)));
        assert_eq!(service.repository_stats(None).unwrap().total_nodes, 0);
    }

    #[test]
    fn test_cypher_reads_and_write_rejection() {
        let (service, _) = indexed();

        let output = service
            .execute_cypher_query("MATCH (n:Function) RETURN n.name AS functionName LIMIT 5")
            .unwrap();
        assert_eq!(output.rows.len(), 5);
        assert!(output.rows[0].contains_key("functionName"));

        let output = service
            .execute_cypher_query(
                "MATCH (n:Function) WHERE n.name = 'create_user_function' RETURN n.name AS functionName",
            )
            .unwrap();
        assert!(output.rows.is_empty());

        let err = service
            .execute_cypher_query("CREATE (n:TestNode) RETURN n")
            .unwrap_err();
        assert!(err.to_string().to_lowercase().contains("read-only"));

        let output = service
            .execute_cypher_query(
                "MATCH (caller:Function)-[:CALLS]->(callee:Function {name: 'helper'}) \
                 RETURN caller.name AS caller ORDER BY caller",
            )
            .unwrap();
        let callers: Vec<&str> = output.rows.iter().filter_map(|r| r["caller"].as_str()).collect();
        assert_eq!(callers, vec!["call_helper_twice", "foo"]);
    }

    #[test]
    fn test_dead_code_skips_called_and_entry_points() {
        let (service, _) = indexed();
        let report = service.find_dead_code(&[]).unwrap();
        let unused: HashSet<&str> = report
            .potentially_unused_functions
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert!(unused.contains("make_dummy"));
        assert!(!unused.contains("helper"));
        assert!(!unused.contains("__init__"));
    }
}
