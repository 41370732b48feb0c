//! Command line interface for cgc.
//!
//! Commands:
//! - Server: start
//! - Indexing: index, delete, list
//! - Query: query, find, stats

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::CgcConfig;
use crate::mcp;
use crate::service::CodeGraphService;

#[derive(Parser)]
#[command(name = "cgc")]
#[command(about = "Code graph indexing and query engine with an MCP server", version)]
pub struct Cli {
    /// Config file (default: $CGC_CONFIG, then .cgc/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the graph snapshot and repository registry
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the MCP server on stdin/stdout
    Start,

    /// Index a file or directory and wait for it to finish
    Index {
        path: PathBuf,
    },

    /// List indexed repositories
    List,

    /// Remove a repository from the graph
    Delete {
        path: PathBuf,
    },

    /// Run a read-only Cypher query
    Query {
        cypher: String,
    },

    /// Search code entities by name
    Find {
        name: String,

        /// Max results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Graph statistics, for one repository or everything
    Stats {
        path: Option<PathBuf>,
    },
}

impl Cli {
    /// Config file, environment, then command line flags.
    pub fn load_config(&self) -> CgcConfig {
        let path = CgcConfig::resolve_path(self.config.as_deref());
        let mut config = CgcConfig::load(&path);
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        config
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config();
    let service = CodeGraphService::open(config).context("failed to open the code graph")?;

    match cli.command {
        Commands::Start => start(service),
        Commands::Index { path } => {
            let summary = service
                .index_now(&path)
                .with_context(|| format!("failed to index {}", path.display()))?;
            println!("Indexed {}", summary.repo_path.display());
            println!(
                "  files: {} of {} ({} failed)",
                summary.files_indexed, summary.total_files, summary.failed_files
            );
            println!(
                "  modules: {}  functions: {}  classes: {}  variables: {}",
                summary.modules, summary.functions, summary.classes, summary.variables
            );
            println!(
                "  edges resolved: {}  unresolved: {}  in {}ms",
                summary.edges_resolved, summary.unresolved, summary.duration_ms
            );
            Ok(())
        }
        Commands::List => {
            let repos = service.list_indexed_repositories()?;
            if repos.is_empty() {
                println!("No repositories indexed.");
            }
            for repo in repos {
                println!(
                    "{}  files={} functions={} classes={} indexed={}",
                    repo.path.display(),
                    repo.file_count,
                    repo.function_count,
                    repo.class_count,
                    repo.indexed_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        Commands::Delete { path } => {
            let removed = service.delete_repository(&path)?;
            println!("Removed {} ({removed} nodes)", path.display());
            Ok(())
        }
        Commands::Query { cypher } => print_json(&service.execute_cypher_query(&cypher)?.rows),
        Commands::Find { name, limit } => print_json(&service.find_code(&name, limit)?),
        Commands::Stats { path } => print_json(&service.repository_stats(path.as_deref())?),
    }
}

fn start(service: CodeGraphService) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let service = Arc::new(service);

    runtime.block_on(async {
        info!(data_dir = %service.config().resolved_data_dir().display(), "starting MCP server");
        eprintln!("MCP Server is running. Waiting for requests on stdin...");
        let served = mcp::run(Arc::clone(&service)).await;
        service.shutdown();
        served
    })?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
