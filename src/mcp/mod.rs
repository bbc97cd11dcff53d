// Model Context Protocol endpoint
//
// JSON-RPC 2.0 over a single HTTP POST route. Tools mirror the snippet
// HTTP API so AI assistants can save, fetch, search and list snippets.

pub mod protocol;
pub mod tools;

pub use tools::McpTools;

use serde_json::{json, Value};

use protocol::*;

#[derive(Clone)]
pub struct McpServer {
    tools: McpTools,
}

fn to_result<T: serde::Serialize>(id: Option<Value>, value: T) -> JsonRpcResponse {
    match serde_json::to_value(value) {
        Ok(v) => JsonRpcResponse::success(id, v),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Serialization error: {}", e)),
    }
}

impl McpServer {
    pub fn new(tools: McpTools) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &McpTools {
        &self.tools
    }

    /// Handle one raw JSON-RPC message. Notifications yield `None`.
    pub async fn handle(&self, body: &str) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => return Some(JsonRpcResponse::error(None, PARSE_ERROR, e.to_string())),
        };

        // A message without an `id` member is a notification and gets no reply
        let is_notification = raw.get("id").is_none();
        let id = raw.get("id").cloned();
        let req: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => return Some(JsonRpcResponse::error(id, INVALID_REQUEST, e.to_string())),
        };
        if req.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                req.id,
                INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            ));
        }

        if is_notification {
            tracing::debug!(method = %req.method, "MCP notification");
            if let Some(JsonRpcResponse { error: Some(error), .. }) = self.dispatch(req).await {
                tracing::debug!(code = error.code, "Dropped error reply to notification");
            }
            return None;
        }

        tracing::debug!(method = %req.method, "MCP request");
        self.dispatch(req).await
    }

    async fn dispatch(&self, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = req.id.clone();

        let response = match req.method.as_str() {
            "initialize" => to_result(
                id,
                InitializeResult {
                    protocol_version: PROTOCOL_VERSION.into(),
                    capabilities: ServerCapabilities {
                        tools: ToolsCapability {
                            list_changed: false,
                        },
                    },
                    server_info: ServerInfo {
                        name: env!("CARGO_PKG_NAME").into(),
                        version: env!("CARGO_PKG_VERSION").into(),
                    },
                },
            ),

            method if method.starts_with("notifications/") => return None,

            "ping" => JsonRpcResponse::success(id, json!({})),

            "tools/list" => to_result(
                id,
                ToolsListResult {
                    tools: tools::get_tools(),
                },
            ),

            "tools/call" => {
                let params: ToolCallParams = match serde_json::from_value(req.params) {
                    Ok(p) => p,
                    Err(e) => {
                        return Some(JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string()))
                    }
                };

                tracing::info!(tool = %params.name, "MCP tool call");
                match self.tools.call(&params.name, params.arguments).await {
                    Some(output) => to_result(id, ToolCallResult::from_output(output)),
                    None => JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        format!("Unknown tool: {}", params.name),
                    ),
                }
            }

            _ => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Unknown method: {}", req.method),
            ),
        };

        Some(response)
    }
}
