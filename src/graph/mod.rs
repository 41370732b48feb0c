//! Code graph: the structural backbone of cgc.
//!
//! Provides the entity model, the petgraph-backed engine, snapshot
//! persistence and the shared store adapter the rest of the crate goes
//! through.

pub mod engine;
pub mod persistence;
pub mod store;
pub mod types;

pub use engine::{CodeGraph, GraphSnapshot, GraphStats};
pub use store::{GraphStore, RepoGuard};
pub use types::{
    EdgeData, EdgeKind, EntityBatch, EntityKey, ExtractedCall, ExtractedImport,
    ExtractedInheritance, ExtractedSymbol, FileExtraction, NodeData, NodeKind, Relationship,
};
