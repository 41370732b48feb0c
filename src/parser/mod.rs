//! Source extraction: source text → entities + references.
//!
//! One [`Extractor`] per language, selected by file extension, keeps the
//! indexing pipeline language-agnostic.

pub mod complexity;
pub mod javascript;
pub mod language;
pub mod python;

pub use language::SupportedLanguage;

use std::path::Path;
use tree_sitter::Node;

use crate::error::{CgcError, Result};
use crate::graph::FileExtraction;

/// Turns the text of one file into a [`FileExtraction`].
pub trait Extractor {
    fn language(&self) -> SupportedLanguage;

    fn extract(&mut self, path: &Path, source: &str) -> Result<FileExtraction>;
}

/// Build the extractor for `language`.
pub fn extractor_for(language: SupportedLanguage) -> Result<Box<dyn Extractor>> {
    match language {
        SupportedLanguage::Python => Ok(Box::new(python::PythonExtractor::new()?)),
        SupportedLanguage::JavaScript | SupportedLanguage::TypeScript | SupportedLanguage::Tsx => {
            Ok(Box::new(javascript::JavaScriptExtractor::new(language)?))
        }
    }
}

/// Extract a single file, choosing the extractor from its extension.
pub fn extract_file(path: &Path, source: &str) -> Result<FileExtraction> {
    let language = SupportedLanguage::from_path(path)
        .ok_or_else(|| CgcError::UnsupportedLanguage(path.display().to_string()))?;
    extractor_for(language)?.extract(path, source)
}

/// Short module name for a file: the stem, or the directory for package
/// entry files (`__init__.py`, `index.js`).
pub fn module_name_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if stem == "__init__" || stem == "index" {
        if let Some(dir) = path.parent().and_then(|p| p.file_name()) {
            return dir.to_string_lossy().to_string();
        }
    }
    stem
}

pub(crate) fn new_parser(language: SupportedLanguage) -> Result<tree_sitter::Parser> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&language.tree_sitter_language())
        .map_err(|e| CgcError::Pipeline(format!("{} grammar: {e}", language.name())))?;
    Ok(parser)
}

pub(crate) fn node_text(node: Node<'_>, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or_default().to_string()
}

/// 1-indexed first and last line of a node.
pub(crate) fn line_span(node: Node<'_>) -> (usize, usize) {
    (node.start_position().row + 1, node.end_position().row + 1)
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}

pub(crate) fn join_qualified(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) if !parent.is_empty() => format!("{parent}.{name}"),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_entry_files_take_directory_name() {
        assert_eq!(module_name_for(Path::new("/p/pkg/__init__.py")), "pkg");
        assert_eq!(module_name_for(Path::new("/p/web/index.ts")), "web");
        assert_eq!(module_name_for(Path::new("/p/module_a.py")), "module_a");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = extract_file(Path::new("main.lua"), "print('hi')").unwrap_err();
        assert!(matches!(err, CgcError::UnsupportedLanguage(_)));
    }

    #[test]
    fn empty_source_extracts_nothing() {
        let extraction = extract_file(Path::new("empty.py"), "").unwrap();
        assert!(extraction.symbols.is_empty());
        assert!(extraction.imports.is_empty());
        assert!(extraction.calls.is_empty());
    }

    #[test]
    fn malformed_source_still_extracts() {
        let result = extract_file(Path::new("bad.py"), "def broken(:\n    return 1\n");
        assert!(result.is_ok());
    }
}
