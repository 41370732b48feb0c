//! Error taxonomy shared by every layer of the crate.
//!
//! Query-time failures are turned into structured tool payloads by the MCP
//! layer; pipeline failures are captured on the job record instead of being
//! raised to the submitter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CgcError {
    /// Malformed or missing arguments.
    #[error("{0}")]
    Validation(String),

    /// Unknown job id, unindexed repository, missing symbol.
    #[error("{0}")]
    NotFound(String),

    /// A mutating query was submitted to the read-only query path.
    #[error("Query rejected: {0}. Only read-only queries are allowed (read-only mode).")]
    WriteRejected(String),

    /// The query text is outside the supported read subset.
    #[error("Query syntax error at offset {offset}: {message}")]
    QuerySyntax { offset: usize, message: String },

    /// Another run holds the repository (or one nested in or around it).
    #[error("{0}")]
    Busy(String),

    /// Parser or backend failure while indexing.
    #[error("Indexing failed: {0}")]
    Pipeline(String),

    #[error("Unsupported language for file: {0}")]
    UnsupportedLanguage(String),

    #[error("Graph store error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl CgcError {
    /// Stable tag used in failure payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            CgcError::Validation(_) => "validation_error",
            CgcError::NotFound(_) => "not_found",
            CgcError::WriteRejected(_) => "write_rejected",
            CgcError::QuerySyntax { .. } => "query_syntax",
            CgcError::Busy(_) => "repository_busy",
            CgcError::Pipeline(_) => "pipeline_failure",
            CgcError::UnsupportedLanguage(_) => "unsupported_language",
            CgcError::Storage(_) => "storage_error",
            CgcError::Io(_) => "io_error",
            CgcError::Serialization(_) => "serialization_error",
            CgcError::Json(_) => "json_error",
            CgcError::Config(_) => "config_error",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CgcError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        CgcError::NotFound(message.into())
    }

    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        CgcError::QuerySyntax {
            offset,
            message: message.into(),
        }
    }

    /// Lock poisoning means a writer panicked mid-batch.
    pub(crate) fn poisoned(what: &str) -> Self {
        CgcError::Storage(format!("{what} lock poisoned"))
    }
}

pub type Result<T> = std::result::Result<T, CgcError>;
