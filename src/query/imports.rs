//! Declared imports of a file or directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CgcError, Result};
use crate::graph::{CodeGraph, GraphStore};
use crate::parser::{extract_file, SupportedLanguage};

/// Imports recorded on indexed modules at `path`: the module itself for a
/// file, or the sorted union over every module beneath a directory.
/// `None` when nothing there is indexed.
pub fn indexed_imports(graph: &CodeGraph, path: &Path) -> Option<Vec<String>> {
    if let Some(idx) = graph.module_by_path(path) {
        return graph.node(idx).map(|n| n.imports.clone());
    }
    let modules = graph.modules_under(path);
    if modules.is_empty() {
        return None;
    }
    let names: BTreeSet<String> = modules
        .into_iter()
        .filter_map(|idx| graph.node(idx))
        .flat_map(|n| n.imports.iter().cloned())
        .collect();
    Some(names.into_iter().collect())
}

/// Import names declared at `path`. Files that were never indexed are
/// parsed on the fly.
pub fn list_imports(store: &GraphStore, path: &Path) -> Result<Vec<String>> {
    if path.as_os_str().is_empty() {
        return Err(CgcError::validation("path must not be empty"));
    }
    let path: PathBuf = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if let Some(imports) = store.read(|graph| indexed_imports(graph, &path))? {
        return Ok(imports);
    }

    if path.is_file() && SupportedLanguage::from_path(&path).is_some() {
        debug!(file = %path.display(), "listing imports of unindexed file");
        let source = std::fs::read_to_string(&path)?;
        return Ok(extract_file(&path, &source)?.import_names());
    }
    Err(CgcError::not_found(format!(
        "No indexed module or supported source file at {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::tests::node;
    use crate::graph::NodeKind;

    #[test]
    fn indexed_modules_and_directories() {
        let store = GraphStore::in_memory(100);
        let mut a = node("/r", "/r/pkg/a.py", "a", NodeKind::Module);
        a.imports = vec!["os".to_string(), "math".to_string()];
        let mut b = node("/r", "/r/pkg/b.py", "b", NodeKind::Module);
        b.imports = vec!["math".to_string(), "json".to_string()];
        store.upsert_entities(vec![a, b]).unwrap();

        assert_eq!(
            list_imports(&store, Path::new("/r/pkg/a.py")).unwrap(),
            vec!["os", "math"]
        );
        assert_eq!(
            list_imports(&store, Path::new("/r/pkg")).unwrap(),
            vec!["json", "math", "os"]
        );
    }

    #[test]
    fn unindexed_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("loose.py");
        std::fs::write(&file, "import math\nfrom module_b import helper\n").unwrap();
        let store = GraphStore::in_memory(100);
        assert_eq!(list_imports(&store, &file).unwrap(), vec!["math", "module_b"]);

        assert!(matches!(
            list_imports(&store, &dir.path().join("absent.py")),
            Err(CgcError::NotFound(_))
        ));
    }
}
