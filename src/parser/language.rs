//! Language detection and tree-sitter grammar loading.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tree_sitter::Language;

/// Supported programming languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupportedLanguage {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
}

impl SupportedLanguage {
    /// Detect language from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext {
            "py" | "pyw" | "pyi" => Some(SupportedLanguage::Python),
            "js" | "mjs" | "cjs" | "jsx" => Some(SupportedLanguage::JavaScript),
            "ts" | "mts" | "cts" => Some(SupportedLanguage::TypeScript),
            "tsx" => Some(SupportedLanguage::Tsx),
            _ => None,
        }
    }

    /// Get the tree-sitter Language for this language.
    pub fn tree_sitter_language(&self) -> Language {
        match self {
            SupportedLanguage::Python => tree_sitter_python::LANGUAGE.into(),
            SupportedLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            SupportedLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            SupportedLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }

    /// Get the display name.
    pub fn name(&self) -> &'static str {
        match self {
            SupportedLanguage::Python => "Python",
            SupportedLanguage::JavaScript => "JavaScript",
            SupportedLanguage::TypeScript => "TypeScript",
            SupportedLanguage::Tsx => "TSX",
        }
    }

    /// Lowercase tag stored on nodes (`lang` in queries).
    pub fn tag(&self) -> &'static str {
        match self {
            SupportedLanguage::Python => "python",
            SupportedLanguage::JavaScript => "javascript",
            SupportedLanguage::TypeScript => "typescript",
            SupportedLanguage::Tsx => "tsx",
        }
    }

    /// Check if two languages can import each other.
    pub fn same_ecosystem(&self, other: &Self) -> bool {
        match (self, other) {
            (SupportedLanguage::Python, SupportedLanguage::Python) => true,
            (SupportedLanguage::Python, _) | (_, SupportedLanguage::Python) => false,
            // JS, TS and TSX can all import each other.
            _ => true,
        }
    }

    /// Extensions tried, in order, when resolving an import to a file.
    pub fn module_extensions(&self) -> &'static [&'static str] {
        match self {
            SupportedLanguage::Python => &["py", "pyi"],
            _ => &["ts", "tsx", "js", "jsx", "mjs", "cjs"],
        }
    }
}
