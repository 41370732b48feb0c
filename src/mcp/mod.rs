//! MCP (Model Context Protocol) server: JSON-RPC 2.0 over stdio exposing
//! the code graph tools.

pub mod server;
pub mod tools;
pub mod types;

pub use server::{run, serve};
