//! JSON-RPC 2.0 envelopes and the MCP result shapes cgc uses.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CgcError;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────

/// An incoming JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// An outgoing JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// An error whose `data` repeats the message as `{error}`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code,
            data: Some(json!({ "error": message })),
            message,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

impl JsonRpcResponse {
    /// A result response. Requests without an id answer with a null id.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(error),
        }
    }
}

// ─── MCP ────────────────────────────────────────────────────────

/// MCP initialize result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: &'static str,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

/// Server capabilities advertised during init.
#[derive(Debug, Serialize)]
pub struct ServerCapabilities {
    pub tools: ToolCapability,
}

/// Tool capability. The tool list is fixed, so it never changes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapability {
    pub list_changed: bool,
}

/// Server identity.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl InitializeResult {
    /// What cgc answers to `initialize`.
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            capabilities: ServerCapabilities {
                tools: ToolCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "cgc",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

/// A tool definition returned by tools/list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// tools/list result.
#[derive(Debug, Serialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDefinition>,
}

/// tools/call params.
#[derive(Debug, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A single content block in a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: &'static str,
    pub text: String,
}

/// tools/call result. `is_error` is set only on failures.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolsCallResult {
    fn text(payload: &Value, is_error: Option<bool>) -> Self {
        Self {
            content: vec![ToolResultContent {
                content_type: "text",
                text: serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string()),
            }],
            is_error,
        }
    }

    /// Success payload rendered as pretty JSON text.
    pub fn json(payload: &Value) -> Self {
        Self::text(payload, None)
    }

    /// Failure payload: no `success` key, an `error` message and its kind.
    pub fn failure(err: &CgcError) -> Self {
        Self::text(
            &json!({ "error": err.to_string(), "error_kind": err.kind() }),
            Some(true),
        )
    }
}
