//! Turning one file's extraction into an entity batch.
//!
//! Edges that stay inside the file are resolved here and committed with the
//! batch; everything else is handed back as [`Deferred`] references.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::resolve::{Deferred, FileIndex};
use crate::graph::types::{
    EdgeKind, EntityBatch, EntityKey, ExtractedSymbol, FileExtraction, NodeData, NodeKind,
    Relationship,
};
use crate::parser::module_name_for;

const SELF_RECEIVERS: &[&str] = &["self", "cls", "this"];

pub struct FileBatch {
    pub batch: EntityBatch,
    pub index: FileIndex,
    pub deferred: Vec<Deferred>,
}

/// Dotted module path of `file` relative to `root` (`pkg.sub.mod`).
/// Package entry files take the package's name.
pub fn dotted_module_name(root: &Path, file: &Path) -> String {
    let relative = match file.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
        _ => PathBuf::from(file.file_name().unwrap_or_default()),
    };
    let mut parts: Vec<String> = relative
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if !(matches!(stem.as_str(), "__init__" | "index") && !parts.is_empty()) {
        parts.push(stem);
    }
    parts.join(".")
}

pub fn build_file_batch(root: &Path, extraction: FileExtraction) -> FileBatch {
    let import_names = extraction.import_names();
    let FileExtraction {
        file_path,
        language,
        line_count,
        symbols,
        imports,
        calls,
        inheritance,
    } = extraction;

    let dotted_name = dotted_module_name(root, &file_path);
    let module_key = EntityKey::module(root.to_path_buf(), file_path.clone(), &dotted_name);

    let module = NodeData {
        name: module_name_for(&file_path),
        qualified_name: dotted_name.clone(),
        kind: NodeKind::Module,
        repo_path: root.to_path_buf(),
        file_path: file_path.clone(),
        language,
        line_start: 1,
        line_end: line_count.max(1),
        source: String::new(),
        docstring: None,
        complexity: None,
        args: Vec::new(),
        decorators: Vec::new(),
        bases: Vec::new(),
        imports: import_names,
        scope: None,
        value: None,
        is_method: false,
    };

    // Functions and classes, with their parents, for scope walks.
    let mut definitions: HashMap<String, EntityKey> = HashMap::new();
    let mut parents: HashMap<String, (NodeKind, Option<String>)> = HashMap::new();
    let mut bases: HashMap<String, Vec<String>> = HashMap::new();
    for symbol in &symbols {
        let kind = symbol.kind();
        if kind == NodeKind::Variable {
            continue;
        }
        definitions
            .entry(symbol.qualified_name.clone())
            .or_insert_with(|| symbol_key(root, &file_path, symbol));
        parents
            .entry(symbol.qualified_name.clone())
            .or_insert((kind, symbol.parent.clone()));
        if kind == NodeKind::Class && !symbol.bases.is_empty() {
            bases.insert(symbol.qualified_name.clone(), symbol.bases.clone());
        }
    }

    let mut batch = EntityBatch::default();
    let mut deferred = Vec::new();
    batch.entities.push(module);

    for symbol in &symbols {
        let key = symbol_key(root, &file_path, symbol);
        let parent = symbol
            .parent
            .as_ref()
            .and_then(|p| definitions.get(p))
            .cloned()
            .unwrap_or_else(|| module_key.clone());
        batch.relationships.push(Relationship {
            source: parent,
            target: key,
            kind: EdgeKind::Contains,
            line: Some(symbol.line_start),
        });
        batch
            .entities
            .push(symbol_node(root, &file_path, language, &dotted_name, symbol));
    }

    for call in calls {
        let source = call
            .caller
            .as_ref()
            .and_then(|c| definitions.get(c))
            .cloned()
            .unwrap_or_else(|| module_key.clone());
        let class = call
            .caller
            .as_deref()
            .and_then(|c| enclosing_class(&parents, c));

        let local = match call.receiver.as_deref() {
            Some(receiver) if SELF_RECEIVERS.contains(&receiver) => class
                .as_ref()
                .and_then(|c| definitions.get(&format!("{c}.{}", call.callee))),
            Some(_) => None,
            None => lookup_in_scope(&definitions, &parents, call.caller.as_deref(), &call.callee),
        };
        match local {
            Some(target) => batch.relationships.push(Relationship {
                source,
                target: target.clone(),
                kind: EdgeKind::Calls,
                line: Some(call.line),
            }),
            None => deferred.push(Deferred::Call {
                file: file_path.clone(),
                source,
                call,
                class,
            }),
        }
    }

    for inherit in inheritance {
        let Some(source) = definitions.get(&inherit.class).cloned() else {
            continue;
        };
        let local = (!inherit.base.contains('.'))
            .then(|| definitions.get(&inherit.base))
            .flatten()
            .filter(|k| k.kind == NodeKind::Class && *k != &source);
        match local {
            Some(target) => batch.relationships.push(Relationship {
                source,
                target: target.clone(),
                kind: EdgeKind::Inherits,
                line: Some(inherit.line),
            }),
            None => deferred.push(Deferred::Inherit {
                file: file_path.clone(),
                source,
                base: inherit.base,
                line: inherit.line,
            }),
        }
    }

    for import in &imports {
        deferred.push(Deferred::Import {
            file: file_path.clone(),
            import: import.clone(),
        });
    }

    FileBatch {
        batch,
        index: FileIndex {
            file_path,
            language,
            module: module_key,
            dotted_name,
            imports,
            definitions,
            bases,
        },
        deferred,
    }
}

fn symbol_key(root: &Path, file_path: &Path, symbol: &ExtractedSymbol) -> EntityKey {
    EntityKey {
        repo_path: root.to_path_buf(),
        file_path: file_path.to_path_buf(),
        qualified_name: symbol.qualified_name.clone(),
        kind: symbol.kind(),
    }
}

fn symbol_node(
    root: &Path,
    file_path: &Path,
    language: crate::parser::SupportedLanguage,
    module_name: &str,
    symbol: &ExtractedSymbol,
) -> NodeData {
    let kind = symbol.kind();
    NodeData {
        name: symbol.name.clone(),
        qualified_name: symbol.qualified_name.clone(),
        kind,
        repo_path: root.to_path_buf(),
        file_path: file_path.to_path_buf(),
        language,
        line_start: symbol.line_start,
        line_end: symbol.line_end,
        source: symbol.code_snippet.clone(),
        docstring: symbol.docstring.clone(),
        complexity: symbol.complexity,
        args: symbol.args.clone(),
        decorators: symbol.decorators.clone(),
        bases: symbol.bases.clone(),
        imports: Vec::new(),
        scope: (kind == NodeKind::Variable)
            .then(|| symbol.parent.clone().unwrap_or_else(|| module_name.to_string())),
        value: symbol.value.clone(),
        is_method: symbol.is_method,
    }
}

/// Nearest class up the parent chain of `qualified`.
fn enclosing_class(
    parents: &HashMap<String, (NodeKind, Option<String>)>,
    qualified: &str,
) -> Option<String> {
    let mut current = parents.get(qualified)?.1.clone();
    while let Some(name) = current {
        let (kind, parent) = parents.get(&name)?;
        if *kind == NodeKind::Class {
            return Some(name);
        }
        current = parent.clone();
    }
    None
}

/// Resolve a bare name from inside `scope`: enclosing function scopes from
/// the innermost outwards, then the module. Class bodies are not part of
/// the lookup chain.
fn lookup_in_scope<'a>(
    definitions: &'a HashMap<String, EntityKey>,
    parents: &HashMap<String, (NodeKind, Option<String>)>,
    scope: Option<&str>,
    name: &str,
) -> Option<&'a EntityKey> {
    let mut current = scope.map(str::to_string);
    while let Some(enclosing) = current {
        let Some((kind, parent)) = parents.get(&enclosing) else {
            break;
        };
        if *kind != NodeKind::Class {
            if let Some(found) = definitions.get(&format!("{enclosing}.{name}")) {
                return Some(found);
            }
        }
        current = parent.clone();
    }
    definitions.get(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::extract_file;

    fn batch_for(root: &str, file: &str, source: &str) -> FileBatch {
        let extraction = extract_file(Path::new(file), source).unwrap();
        build_file_batch(Path::new(root), extraction)
    }

    fn edges(batch: &FileBatch, kind: EdgeKind) -> Vec<(String, String)> {
        batch
            .batch
            .relationships
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| (r.source.qualified_name.clone(), r.target.qualified_name.clone()))
            .collect()
    }

    #[test]
    fn dotted_names() {
        let root = Path::new("/repo");
        assert_eq!(dotted_module_name(root, Path::new("/repo/module_a.py")), "module_a");
        assert_eq!(dotted_module_name(root, Path::new("/repo/pkg/sub/mod.py")), "pkg.sub.mod");
        assert_eq!(dotted_module_name(root, Path::new("/repo/pkg/__init__.py")), "pkg");
        assert_eq!(dotted_module_name(Path::new("/repo/solo.py"), Path::new("/repo/solo.py")), "solo");
    }

    #[test]
    fn containment_follows_nesting() {
        let batch = batch_for(
            "/repo",
            "/repo/shapes.py",
            "\
LIMIT = 3

class Shape:
    def area(self):
        def helper():
            return 1
        return helper()
",
        );
        let contains = edges(&batch, EdgeKind::Contains);
        assert!(contains.contains(&("shapes".into(), "LIMIT".into())));
        assert!(contains.contains(&("shapes".into(), "Shape".into())));
        assert!(contains.contains(&("Shape".into(), "Shape.area".into())));
        assert!(contains.contains(&("Shape.area".into(), "Shape.area.helper".into())));
        // module + LIMIT + Shape + area + helper
        assert_eq!(batch.batch.entities.len(), 5);
    }

    #[test]
    fn same_file_calls_resolve_immediately() {
        let batch = batch_for(
            "/repo",
            "/repo/calls.py",
            "\
import module_b

def helper():
    return 1

class Worker:
    def run(self):
        self.step()
        helper()
        module_b.remote()

    def step(self):
        pass

helper()
",
        );
        let calls = edges(&batch, EdgeKind::Calls);
        assert!(calls.contains(&("Worker.run".into(), "Worker.step".into())));
        assert!(calls.contains(&("Worker.run".into(), "helper".into())));
        // Top-level call is attributed to the module.
        assert!(calls.contains(&("calls".into(), "helper".into())));

        let deferred_calls: Vec<&str> = batch
            .deferred
            .iter()
            .filter_map(|d| match d {
                Deferred::Call { call, .. } => Some(call.callee.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deferred_calls, vec!["remote"]);
        assert!(batch
            .deferred
            .iter()
            .any(|d| matches!(d, Deferred::Import { import, .. } if import.module == "module_b")));
    }

    #[test]
    fn local_bases_link_and_foreign_bases_defer() {
        let batch = batch_for(
            "/repo",
            "/repo/classes.py",
            "\
class A:
    pass

class B(A, external.Mixin):
    pass
",
        );
        assert_eq!(edges(&batch, EdgeKind::Inherits), vec![("B".to_string(), "A".to_string())]);
        assert!(batch
            .deferred
            .iter()
            .any(|d| matches!(d, Deferred::Inherit { base, .. } if base == "external.Mixin")));
        assert_eq!(batch.index.bases["B"], vec!["A", "external.Mixin"]);
    }
}
