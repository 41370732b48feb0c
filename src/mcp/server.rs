//! MCP JSON-RPC 2.0 server over newline-delimited JSON.
//!
//! Requests arrive on stdin, responses go to stdout. Tracing output goes to
//! stderr so it never interleaves with the protocol.
//!
//! `tools/call` requests run on the blocking pool and answer through a
//! channel, so a slow tool never holds up the rest of the session. Responses
//! to concurrent calls may therefore arrive out of order; clients match them
//! by id.

use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::tools;
use super::types::*;
use crate::error::Result;
use crate::service::CodeGraphService;

/// Serve on the process's stdin/stdout until stdin closes.
pub async fn run(service: Arc<CodeGraphService>) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = tokio::io::stdout();
    serve(service, reader, writer).await
}

/// Serve requests from `reader`, one JSON message per line. Returns once
/// `reader` is exhausted and every in-flight call has answered.
pub async fn serve<R, W>(service: Arc<CodeGraphService>, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("MCP server loop started");
    let mut lines = reader.lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    let mut sender = Some(tx);

    loop {
        tokio::select! {
            line = lines.next_line(), if sender.is_some() => {
                let Some(line) = line? else {
                    info!("stdin closed, waiting for in-flight calls");
                    sender = None;
                    continue;
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                debug!(request = %trimmed, "received request");

                let request = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(error = %e, "invalid JSON-RPC message");
                        let response = JsonRpcResponse::error(
                            None,
                            JsonRpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
                        );
                        write_response(&mut writer, &response).await?;
                        continue;
                    }
                };

                let offload = request.id.is_some() && request.method == "tools/call";
                match (&sender, offload) {
                    (Some(tx), true) => {
                        let service = Arc::clone(&service);
                        let tx = tx.clone();
                        tokio::task::spawn_blocking(move || {
                            if let Some(response) = handle_request(&service, request) {
                                // The receiver outlives every sender.
                                let _ = tx.send(response);
                            }
                        });
                    }
                    _ => {
                        if let Some(response) = handle_request(&service, request) {
                            write_response(&mut writer, &response).await?;
                        }
                    }
                }
            }
            response = rx.recv() => match response {
                Some(response) => write_response(&mut writer, &response).await?,
                None => break,
            },
        }
    }
    info!("MCP server stopping");
    Ok(())
}

/// Handle one request. `None` for notifications.
pub fn handle_request(service: &CodeGraphService, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let JsonRpcRequest { id, method, params, .. } = request;
    if id.is_none() {
        debug!(method = %method, "notification");
        if method == "notifications/initialized" {
            info!("client initialized");
        }
        return None;
    }

    let outcome = match method.as_str() {
        "initialize" => {
            info!("client initializing");
            to_result(&InitializeResult::current())
        }
        "ping" => Ok(Value::Object(Default::default())),
        "tools/list" => to_result(&ToolsListResult {
            tools: tools::list_tools(),
        }),
        "tools/call" => match serde_json::from_value::<ToolsCallParams>(params) {
            Ok(call) => {
                debug!(tool = %call.name, "calling tool");
                tools::call_tool(service, &call.name, &call.arguments).and_then(|r| to_result(&r))
            }
            Err(e) => Err(JsonRpcError::invalid_params(format!("Invalid params: {e}"))),
        },
        other => {
            warn!(method = %other, "unknown method");
            Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ))
        }
    };

    Some(match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::error(id, error),
    })
}

fn to_result<T: serde::Serialize>(value: &T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| {
        error!(error = %e, "failed to serialize response");
        JsonRpcError::new(INTERNAL_ERROR, format!("Internal error: {e}"))
    })
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &JsonRpcResponse) -> Result<()> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}
