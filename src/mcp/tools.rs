//! MCP tool catalogue and dispatch onto [`CodeGraphService`].

use serde_json::{json, Map, Value};
use std::path::Path;

use super::types::{JsonRpcError, ToolDefinition, ToolsCallResult};
use crate::error::{CgcError, Result};
use crate::query::QueryType;
use crate::service::CodeGraphService;

/// Default for `find_most_complex_functions` when no limit is given.
const DEFAULT_COMPLEX_LIMIT: usize = 10;

pub fn list_tools() -> Vec<ToolDefinition> {
    let query_types: Vec<&str> = QueryType::ALL.iter().map(QueryType::as_str).collect();
    vec![
        ToolDefinition {
            name: "add_code_to_graph",
            description: "Index a file or directory into the code graph. Runs in the \
                background and returns a job id to poll with check_job_status. \
                Re-indexing a path replaces its previous contents.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File or directory to index" }
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "check_job_status",
            description: "Current state and progress of an indexing job.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "job_id": { "type": "string", "description": "Id returned by add_code_to_graph" }
                },
                "required": ["job_id"]
            }),
        },
        ToolDefinition {
            name: "list_jobs",
            description: "All indexing jobs, newest first.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: "cancel_job",
            description: "Cancel a queued or running indexing job. Entities already \
                committed stay in the graph.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "job_id": { "type": "string" }
                },
                "required": ["job_id"]
            }),
        },
        ToolDefinition {
            name: "delete_repository",
            description: "Remove an indexed repository and everything under it from the graph.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_path": { "type": "string", "description": "Root path that was indexed" }
                },
                "required": ["repo_path"]
            }),
        },
        ToolDefinition {
            name: "list_indexed_repositories",
            description: "Repositories currently in the graph with their file and symbol counts.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: "get_repository_stats",
            description: "Node and edge counts for one repository, or the whole graph.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_path": { "type": "string", "description": "Optional repository root" }
                }
            }),
        },
        ToolDefinition {
            name: "find_code",
            description: "Search functions, classes, variables and modules by name, \
                qualified name, arguments or docstring. Exact name matches rank first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Name or text to look for" },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "analyze_code_relationships",
            description: "Relationship queries over the graph: callers, callees, call \
                chains, class hierarchies, importers, module dependencies and more.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query_type": { "type": "string", "enum": query_types },
                    "target": { "type": "string", "description": "Function, class, module or variable name" },
                    "context": {
                        "type": "string",
                        "description": "Optional file path narrowing the target, or the destination of call_chain"
                    }
                },
                "required": ["query_type", "target"]
            }),
        },
        ToolDefinition {
            name: "list_imports",
            description: "Import names declared by a file, or by every module under a directory.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "find_dead_code",
            description: "Functions and classes nothing calls or inherits from. Entry points \
                and functions with excluded decorators are skipped.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "exclude_decorated_with": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Decorators marking functions as used, e.g. app.route"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "calculate_cyclomatic_complexity",
            description: "Cyclomatic complexity of every function with the given name.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "function_name": { "type": "string" },
                    "path": { "type": "string", "description": "Optional file or directory scope" }
                },
                "required": ["function_name"]
            }),
        },
        ToolDefinition {
            name: "find_most_complex_functions",
            description: "Functions with the highest cyclomatic complexity.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1, "default": DEFAULT_COMPLEX_LIMIT }
                }
            }),
        },
        ToolDefinition {
            name: "execute_cypher_query",
            description: "Run a read-only Cypher query (MATCH ... WHERE ... RETURN). \
                Labels: Module, Function, Class, Variable. Relationships: CONTAINS, \
                CALLS, IMPORTS, INHERITS. Write clauses are rejected.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cypher_query": { "type": "string" }
                },
                "required": ["cypher_query"]
            }),
        },
    ]
}

/// Dispatch one `tools/call`. Unknown tools and non-object arguments are
/// protocol errors; everything else comes back as a tool result.
pub fn call_tool(
    service: &CodeGraphService,
    name: &str,
    arguments: &Value,
) -> std::result::Result<ToolsCallResult, JsonRpcError> {
    let empty = Map::new();
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => return Err(JsonRpcError::invalid_params("arguments must be an object")),
    };

    let outcome = match name {
        "add_code_to_graph" => add_code_to_graph(service, args),
        "check_job_status" => check_job_status(service, args),
        "list_jobs" => list_jobs(service),
        "cancel_job" => cancel_job(service, args),
        "delete_repository" => delete_repository(service, args),
        "list_indexed_repositories" => list_indexed_repositories(service),
        "get_repository_stats" => get_repository_stats(service, args),
        "find_code" => find_code(service, args),
        "analyze_code_relationships" => analyze_code_relationships(service, args),
        "list_imports" => list_imports(service, args),
        "find_dead_code" => find_dead_code(service, args),
        "calculate_cyclomatic_complexity" => calculate_cyclomatic_complexity(service, args),
        "find_most_complex_functions" => find_most_complex_functions(service, args),
        "execute_cypher_query" => execute_cypher_query(service, args),
        _ => return Err(JsonRpcError::invalid_params(format!("Unknown tool: {name}"))),
    };

    Ok(match outcome {
        Ok(payload) => ToolsCallResult::json(&payload),
        Err(e) => {
            tracing::warn!(tool = %name, kind = e.kind(), error = %e, "tool call failed");
            ToolsCallResult::failure(&e)
        }
    })
}

// ─── Argument helpers ───────────────────────────────────────────

type Args = Map<String, Value>;

fn required_str<'a>(args: &'a Args, key: &str) -> Result<&'a str> {
    match args.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::String(_)) => Err(CgcError::validation(format!("'{key}' must not be empty"))),
        Some(_) => Err(CgcError::validation(format!("'{key}' must be a string"))),
        None => Err(CgcError::validation(format!("Missing required parameter: {key}"))),
    }
}

fn optional_str<'a>(args: &'a Args, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(CgcError::validation(format!("'{key}' must be a string"))),
    }
}

fn optional_limit(args: &Args, key: &str) -> Result<Option<usize>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_u64() {
            Some(n) if n > 0 => Ok(Some(usize::try_from(n).unwrap_or(usize::MAX))),
            _ => Err(CgcError::validation(format!("'{key}' must be a positive integer"))),
        },
    }
}

fn optional_strings(args: &Args, key: &str) -> Result<Vec<String>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CgcError::validation(format!("'{key}' must contain strings")))
            })
            .collect(),
        Some(_) => Err(CgcError::validation(format!("'{key}' must be a list of strings"))),
    }
}

// ─── Handlers ───────────────────────────────────────────────────

fn add_code_to_graph(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let path = required_str(args, "path")?;
    let submission = service.add_code_to_graph(Path::new(path))?;
    let message = if submission.coalesced {
        format!("Indexing of {path} is already in progress")
    } else {
        format!("Indexing of {path} started")
    };
    Ok(json!({
        "success": true,
        "job_id": submission.job_id,
        "coalesced": submission.coalesced,
        "message": message,
    }))
}

fn check_job_status(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let job = service.check_job_status(required_str(args, "job_id")?)?;
    Ok(json!({ "success": true, "job": job }))
}

fn list_jobs(service: &CodeGraphService) -> Result<Value> {
    Ok(json!({ "success": true, "jobs": service.list_jobs()? }))
}

fn cancel_job(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let job = service.cancel_job(required_str(args, "job_id")?)?;
    Ok(json!({ "success": true, "job": job }))
}

fn delete_repository(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let repo_path = required_str(args, "repo_path")?;
    let deleted = service.delete_repository(Path::new(repo_path))?;
    Ok(json!({
        "success": true,
        "deleted_nodes": deleted,
        "message": format!("Repository {repo_path} removed from the graph"),
    }))
}

fn list_indexed_repositories(service: &CodeGraphService) -> Result<Value> {
    Ok(json!({
        "success": true,
        "repositories": service.list_indexed_repositories()?,
    }))
}

fn get_repository_stats(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let repo = optional_str(args, "repo_path")?.map(Path::new);
    Ok(json!({ "success": true, "stats": service.repository_stats(repo)? }))
}

fn find_code(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let query = required_str(args, "query")?;
    let hits = service.find_code(query, optional_limit(args, "limit")?)?;
    Ok(json!({
        "success": true,
        "query": query,
        "results": {
            "total": hits.len(),
            "ranked_results": hits,
        },
    }))
}

fn analyze_code_relationships(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let query_type = required_str(args, "query_type")?;
    let target = required_str(args, "target")?;
    let context = optional_str(args, "context")?;
    let results = service.analyze_code_relationships(query_type, target, context)?;
    Ok(json!({
        "success": true,
        "query_type": query_type,
        "target": target,
        "context": context,
        "results": { "results": results },
    }))
}

fn list_imports(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let path = required_str(args, "path")?;
    let imports = service.list_imports(Path::new(path))?;
    Ok(json!({ "success": true, "path": path, "imports": imports }))
}

fn find_dead_code(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let excluded = optional_strings(args, "exclude_decorated_with")?;
    let report = service.find_dead_code(&excluded)?;
    Ok(json!({ "success": true, "results": report }))
}

fn calculate_cyclomatic_complexity(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let name = required_str(args, "function_name")?;
    let path = optional_str(args, "path")?.map(Path::new);
    let results = service.calculate_cyclomatic_complexity(name, path)?;
    Ok(json!({ "success": true, "function_name": name, "results": results }))
}

fn find_most_complex_functions(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let limit = optional_limit(args, "limit")?.unwrap_or(DEFAULT_COMPLEX_LIMIT);
    let results = service.find_most_complex_functions(limit)?;
    Ok(json!({ "success": true, "limit": limit, "results": results }))
}

fn execute_cypher_query(service: &CodeGraphService, args: &Args) -> Result<Value> {
    let output = service.execute_cypher_query(required_str(args, "cypher_query")?)?;
    Ok(json!({
        "success": true,
        "columns": output.columns,
        "row_count": output.rows.len(),
        "results": output.rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CgcConfig;

    fn payload(result: &ToolsCallResult) -> Value {
        serde_json::from_str(&result.content[0].text).unwrap()
    }

    fn call(service: &CodeGraphService, name: &str, args: Value) -> (Value, bool) {
        let result = call_tool(service, name, &args).unwrap();
        (payload(&result), result.is_error == Some(true))
    }

    #[test]
    fn every_listed_tool_dispatches() {
        let service = CodeGraphService::in_memory(CgcConfig::default());
        for tool in list_tools() {
            let result = call_tool(&service, tool.name, &json!({}));
            assert!(result.is_ok(), "{} was not dispatched", tool.name);
        }
    }

    #[test]
    fn unknown_tool_is_invalid_params() {
        let service = CodeGraphService::in_memory(CgcConfig::default());
        let err = call_tool(&service, "nope", &json!({})).err().unwrap();
        assert_eq!(err.code, super::super::types::INVALID_PARAMS);
        assert_eq!(err.data.unwrap()["error"], "Unknown tool: nope");
    }

    #[test]
    fn failures_have_error_and_no_success() {
        let service = CodeGraphService::in_memory(CgcConfig::default());
        let (body, is_error) = call(
            &service,
            "execute_cypher_query",
            json!({ "cypher_query": "CREATE (n:TestNode) RETURN n" }),
        );
        assert!(is_error);
        assert!(body.get("success").is_none());
        assert!(body["error"].as_str().unwrap().contains("read-only"));
        assert_eq!(body["error_kind"], "write_rejected");

        let (body, is_error) = call(&service, "check_job_status", json!({}));
        assert!(is_error);
        assert_eq!(body["error_kind"], "validation_error");

        let (body, _) = call(&service, "check_job_status", json!({ "job_id": "missing" }));
        assert_eq!(body["error_kind"], "not_found");
    }

    #[test]
    fn read_query_results_are_rows() {
        let service = CodeGraphService::in_memory(CgcConfig::default());
        let (body, is_error) = call(
            &service,
            "execute_cypher_query",
            json!({ "cypher_query": "MATCH (n) WHERE n.name = 'create_user_function' RETURN count(n) AS total" }),
        );
        assert!(!is_error);
        assert_eq!(body["success"], true);
        assert_eq!(body["results"], json!([{ "total": 0 }]));
    }

    #[test]
    fn argument_types_are_checked() {
        let service = CodeGraphService::in_memory(CgcConfig::default());
        let (body, is_error) = call(&service, "find_most_complex_functions", json!({ "limit": -3 }));
        assert!(is_error);
        assert_eq!(body["error_kind"], "validation_error");
        assert!(call_tool(&service, "find_code", &json!(["query"])).is_err());
    }
}
