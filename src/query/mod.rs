//! Read side of the graph: code search, relationship analysis, metrics
//! and the Cypher subset.

pub mod cypher;
pub mod dead_code;
pub mod imports;
pub mod metrics;
pub mod relationships;
pub mod search;

pub use cypher::QueryOutput;
pub use dead_code::{find_dead_code, DeadCodeHit, DeadCodeReport};
pub use imports::list_imports;
pub use metrics::{calculate_cyclomatic_complexity, find_most_complex_functions, ComplexityHit};
pub use relationships::{analyze, QueryType};
pub use search::{find_code, SearchHit};
