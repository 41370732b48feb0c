//! cgc - code graph indexing and query engine.
//!
//! Usage:
//!   cgc start                    # MCP server on stdio
//!   cgc index <path>             # Index and wait
//!   cgc list                     # Indexed repositories
//!   cgc delete <path>            # Remove a repository
//!   cgc query "<cypher>"         # Read-only Cypher
//!   cgc find <name>              # Ranked code search
//!   cgc stats [path]             # Graph statistics

use clap::Parser;

use cgc::cli::{self, Cli};

fn main() {
    // stdout carries the protocol in `start`, so logs always go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = cli::run(Cli::parse()) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
