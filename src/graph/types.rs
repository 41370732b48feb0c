//! Core types for the code graph.
//!
//! Defines node kinds, edge kinds, the natural keys used for upserts, and
//! the intermediate structures extractors produce before anything touches
//! the graph.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::parser::SupportedLanguage;

/// The kind of a node in the code graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A source file.
    Module,
    /// A function or method definition.
    Function,
    /// A class definition.
    Class,
    /// A module-level or function-local binding.
    Variable,
}

impl NodeKind {
    /// Label used by the query language.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Module => "Module",
            NodeKind::Function => "Function",
            NodeKind::Class => "Class",
            NodeKind::Variable => "Variable",
        }
    }

    /// Case-insensitive label lookup. `File` is accepted for modules.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "module" | "file" => Some(NodeKind::Module),
            "function" | "method" => Some(NodeKind::Function),
            "class" => Some(NodeKind::Class),
            "variable" => Some(NodeKind::Variable),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Module => write!(f, "module"),
            NodeKind::Function => write!(f, "function"),
            NodeKind::Class => write!(f, "class"),
            NodeKind::Variable => write!(f, "variable"),
        }
    }
}

/// The kind of an edge (relationship) in the code graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// Ownership (Module -> Function/Class/Variable, Class -> method).
    Contains,
    /// Caller invokes callee.
    Calls,
    /// Module imports another indexed module.
    Imports,
    /// Subclass -> immediate parent.
    Inherits,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "CONTAINS",
            EdgeKind::Calls => "CALLS",
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::Inherits => "INHERITS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "CONTAINS" => Some(EdgeKind::Contains),
            "CALLS" => Some(EdgeKind::Calls),
            "IMPORTS" => Some(EdgeKind::Imports),
            "INHERITS" => Some(EdgeKind::Inherits),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of an entity. Upserts merge on this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub repo_path: PathBuf,
    pub file_path: PathBuf,
    /// Dotted name inside the module (`Class.method`); the module name for modules.
    pub qualified_name: String,
    pub kind: NodeKind,
}

impl EntityKey {
    pub fn module(repo_path: PathBuf, file_path: PathBuf, module_name: &str) -> Self {
        Self {
            repo_path,
            file_path,
            qualified_name: module_name.to_string(),
            kind: NodeKind::Module,
        }
    }
}

/// Data stored in a graph node.
///
/// Attributes that only apply to some kinds stay empty for the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Short name (`helper`, `Dummy`, `module_a`).
    pub name: String,
    pub qualified_name: String,
    pub kind: NodeKind,
    /// Absolute root of the repository this node was indexed under.
    pub repo_path: PathBuf,
    /// Absolute path of the defining file.
    pub file_path: PathBuf,
    pub language: SupportedLanguage,
    /// Starting line number (1-indexed).
    pub line_start: usize,
    /// Ending line number (1-indexed).
    pub line_end: usize,
    pub source: String,
    pub docstring: Option<String>,
    /// Cyclomatic complexity, functions only.
    pub complexity: Option<u32>,
    pub args: Vec<String>,
    pub decorators: Vec<String>,
    /// Base class expressions as written, classes only.
    pub bases: Vec<String>,
    /// Declared import names, modules only.
    pub imports: Vec<String>,
    /// Defining scope, variables only.
    pub scope: Option<String>,
    /// Assigned value snippet, variables only.
    pub value: Option<String>,
    pub is_method: bool,
}

impl NodeData {
    pub fn key(&self) -> EntityKey {
        EntityKey {
            repo_path: self.repo_path.clone(),
            file_path: self.file_path.clone(),
            qualified_name: self.qualified_name.clone(),
            kind: self.kind,
        }
    }

    /// The file name without directories (`module_a.py`).
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Data stored on a graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeData {
    pub kind: EdgeKind,
    /// Line of the call/import/class statement that produced the edge.
    pub line: Option<usize>,
}

impl EdgeData {
    pub fn new(kind: EdgeKind) -> Self {
        Self { kind, line: None }
    }

    pub fn at_line(kind: EdgeKind, line: usize) -> Self {
        Self {
            kind,
            line: Some(line),
        }
    }
}

/// A relationship expressed by natural keys, ready for upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub source: EntityKey,
    pub target: EntityKey,
    pub kind: EdgeKind,
    pub line: Option<usize>,
}

/// Entities and relationships committed together (one file, or the
/// finalization pass).
#[derive(Debug, Clone, Default)]
pub struct EntityBatch {
    pub entities: Vec<NodeData>,
    pub relationships: Vec<Relationship>,
}

impl EntityBatch {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

// ─── Extraction Output ──────────────────────────────────────────

/// A symbol extracted from parsing a source file.
/// This is an intermediate representation before being added to the graph.
#[derive(Debug, Clone, Default)]
pub struct ExtractedSymbol {
    pub name: String,
    /// Dotted path inside the file (`Outer.method`).
    pub qualified_name: String,
    /// `Function`, `Class` or `Variable`.
    pub kind: Option<NodeKind>,
    pub line_start: usize,
    pub line_end: usize,
    pub code_snippet: String,
    /// Qualified name of the enclosing function/class, `None` at top level.
    pub parent: Option<String>,
    pub complexity: Option<u32>,
    pub args: Vec<String>,
    pub decorators: Vec<String>,
    pub bases: Vec<String>,
    pub docstring: Option<String>,
    pub value: Option<String>,
    pub is_method: bool,
}

impl ExtractedSymbol {
    pub fn kind(&self) -> NodeKind {
        self.kind.unwrap_or(NodeKind::Function)
    }
}

/// An import extracted from a source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedImport {
    /// Module being imported (`module_b`, `os.path`, `./utils`).
    pub module: String,
    /// Names pulled out of the module by `from x import a, b` / `import { a }`.
    pub names: Vec<String>,
    /// `import numpy as np` → `np`.
    pub alias: Option<String>,
    /// Leading dots of a Python relative import.
    pub level: usize,
    pub line: usize,
}

/// A function call extracted from a source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedCall {
    /// Qualified name of the calling function; `None` for top-level code.
    pub caller: Option<String>,
    /// Final name segment of the callee (`helper` in `module_b.helper()`).
    pub callee: String,
    /// Receiver expression, if any (`self`, `module_b`, `obj.attr`).
    pub receiver: Option<String>,
    pub line: usize,
}

/// A class-to-base relationship extracted from a class header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedInheritance {
    /// Qualified name of the subclass.
    pub class: String,
    /// Base expression as written (`B`, `models.Model`).
    pub base: String,
    pub line: usize,
}

/// All extracted information from a single source file.
#[derive(Debug, Clone)]
pub struct FileExtraction {
    pub file_path: PathBuf,
    pub language: SupportedLanguage,
    /// Total number of lines in the file.
    pub line_count: usize,
    pub symbols: Vec<ExtractedSymbol>,
    pub imports: Vec<ExtractedImport>,
    pub calls: Vec<ExtractedCall>,
    pub inheritance: Vec<ExtractedInheritance>,
}

impl FileExtraction {
    pub fn new(file_path: PathBuf, language: SupportedLanguage) -> Self {
        Self {
            file_path,
            language,
            line_count: 0,
            symbols: Vec::new(),
            imports: Vec::new(),
            calls: Vec::new(),
            inheritance: Vec::new(),
        }
    }

    /// Import names in declaration order, deduplicated. `from . import x`
    /// contributes `x` since it has no module part.
    pub fn import_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for import in &self.imports {
            let declared: Vec<&String> = if import.module.is_empty() {
                import.names.iter().collect()
            } else {
                vec![&import.module]
            };
            for name in declared {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    pub fn find_symbol(&self, qualified_name: &str) -> Option<&ExtractedSymbol> {
        self.symbols
            .iter()
            .find(|s| s.qualified_name == qualified_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_lookup() {
        for kind in [
            NodeKind::Module,
            NodeKind::Function,
            NodeKind::Class,
            NodeKind::Variable,
        ] {
            assert_eq!(NodeKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(NodeKind::from_label("File"), Some(NodeKind::Module));
        assert_eq!(NodeKind::from_label("Repository"), None);
    }

    #[test]
    fn edge_kind_names_are_case_insensitive() {
        assert_eq!(EdgeKind::from_name("calls"), Some(EdgeKind::Calls));
        assert_eq!(EdgeKind::Inherits.to_string(), "INHERITS");
    }

    #[test]
    fn import_names_dedupe_in_order() {
        let mut extraction = FileExtraction::new(PathBuf::from("a.py"), SupportedLanguage::Python);
        for module in ["math", "module_b", "math"] {
            extraction.imports.push(ExtractedImport {
                module: module.to_string(),
                ..Default::default()
            });
        }
        assert_eq!(extraction.import_names(), vec!["math", "module_b"]);
    }
}
