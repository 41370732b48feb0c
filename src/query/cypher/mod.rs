//! Read-only Cypher subset executed against the in-memory graph.
//!
//! Supported: `MATCH` / `OPTIONAL MATCH` with node and relationship
//! patterns (including bounded variable-length ranges), `WHERE`,
//! `RETURN [DISTINCT]` with aliases and aggregates, `ORDER BY`, `SKIP`
//! and `LIMIT`. Anything that could mutate the graph is refused before
//! parsing.

pub mod exec;
pub mod lexer;
pub mod parser;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CgcError, Result};
use lexer::{Token, TokenKind};

pub use exec::execute;
pub use parser::Query;

/// Clause keywords that write to (or escape) the graph.
const WRITE_KEYWORDS: &[&str] = &[
    "CREATE", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "DROP", "FOREACH", "LOAD", "CALL",
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

/// A bare keyword used as a clause rather than as a property key, label,
/// or alias.
fn write_clause(tokens: &[Token], i: usize) -> Option<String> {
    let word = tokens[i].keyword()?;
    if !WRITE_KEYWORDS.contains(&word.as_str()) {
        return None;
    }
    let after_name_marker = i
        .checked_sub(1)
        .and_then(|p| tokens.get(p))
        .is_some_and(|prev| {
            matches!(prev.kind, TokenKind::Dot | TokenKind::Colon) || prev.is_keyword("AS")
        });
    let is_map_key = tokens
        .get(i + 1)
        .is_some_and(|next| next.kind == TokenKind::Colon);
    if after_name_marker || is_map_key {
        None
    } else {
        Some(word)
    }
}

/// Tokenize, refuse write clauses, then parse.
///
/// Keywords inside string literals, backtick identifiers, or longer
/// identifiers (`create_user`) never trigger a rejection.
pub fn parse_read_only(text: &str) -> Result<Query> {
    if text.trim().is_empty() {
        return Err(CgcError::validation("query must not be empty"));
    }
    let tokens = lexer::tokenize(text)?;
    if let Some(word) = (0..tokens.len()).find_map(|i| write_clause(&tokens, i)) {
        return Err(CgcError::WriteRejected(format!("{word} clause")));
    }
    parser::parse(text, &tokens)
}
