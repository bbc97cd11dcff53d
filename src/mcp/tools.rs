// MCP tool definitions and handlers
//
// Each handler takes the raw trigger context (`{"arguments": {...}}`) and
// returns a JSON string, so the same functions back `tools/call` and can be
// invoked directly.

use serde_json::{json, Map, Value};

use super::protocol::Tool;
use crate::config::constants::{DEFAULT_PROJECT, MAX_TOP_K};
use crate::storage::{SavedSnippet, SnippetService};

pub const SAVE_SNIPPET: &str = "save_snippet";
pub const GET_SNIPPET: &str = "get_snippet";
pub const SEARCH_SNIPPETS: &str = "search_snippets";
pub const LIST_SNIPPETS: &str = "list_snippets";

fn string_prop(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

pub fn get_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: SAVE_SNIPPET.into(),
            description: "Save a code snippet with a vector embedding so it can be searched later".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "snippetname": string_prop("The name of the snippet"),
                    "snippet": string_prop("The code of the snippet"),
                    "projectid": string_prop("The project the snippet belongs to"),
                },
                "required": ["snippetname", "snippet"]
            }),
        },
        Tool {
            name: GET_SNIPPET.into(),
            description: "Retrieve a saved snippet by name".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"snippetname": string_prop("The name of the snippet")},
                "required": ["snippetname"]
            }),
        },
        Tool {
            name: SEARCH_SNIPPETS.into(),
            description: "Semantic search over the snippets of a project".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": string_prop("Natural-language or code query"),
                    "projectid": string_prop("The project to search"),
                    "k": {"type": "integer", "description": "Maximum results (1-50)"},
                },
                "required": ["query"]
            }),
        },
        Tool {
            name: LIST_SNIPPETS.into(),
            description: "List saved snippets, most recently updated first".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"projectid": string_prop("Only list this project")}
            }),
        },
    ]
}

fn error(message: impl Into<String>) -> String {
    json!({"error": message.into()}).to_string()
}

/// Parse `{"arguments": {...}}`; a missing `arguments` key means no arguments
fn parse_context(context: &str) -> Result<Map<String, Value>, String> {
    let value: Value = serde_json::from_str(context)
        .map_err(|e| error(format!("Invalid JSON context: {}", e)))?;
    match value.get("arguments") {
        Some(Value::Object(args)) => Ok(args.clone()),
        Some(Value::Null) | None => Ok(Map::new()),
        Some(_) => Err(error("Invalid JSON context: arguments must be an object")),
    }
}

fn required<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| error(format!("Missing required argument: {}", key)))
}

fn optional<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| error(format!("Serialization error: {}", e)))
}

#[derive(Clone)]
pub struct McpTools {
    snippets: SnippetService,
    default_top_k: usize,
}

impl McpTools {
    pub fn new(snippets: SnippetService, default_top_k: usize) -> Self {
        Self {
            snippets,
            default_top_k,
        }
    }

    /// Dispatch by tool name; `None` when the tool is unknown
    pub async fn call(&self, name: &str, arguments: Value) -> Option<String> {
        let context = json!({"arguments": arguments}).to_string();
        let output = match name {
            SAVE_SNIPPET => self.save_snippet(&context).await,
            GET_SNIPPET => self.get_snippet(&context).await,
            SEARCH_SNIPPETS => self.search_snippets(&context).await,
            LIST_SNIPPETS => self.list_snippets(&context).await,
            _ => return None,
        };
        Some(output)
    }

    pub async fn save_snippet(&self, context: &str) -> String {
        let args = match parse_context(context) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let (name, code) = match (required(&args, "snippetname"), required(&args, "snippet")) {
            (Ok(n), Ok(c)) => (n, c),
            (Err(e), _) | (_, Err(e)) => return e,
        };
        let project = optional(&args, "projectid").unwrap_or(DEFAULT_PROJECT);

        match self.snippets.save(name, code, project).await {
            Ok(saved) => to_json(&saved),
            Err(e) => {
                tracing::error!(snippet = %name, "MCP save_snippet failed: {:#}", e);
                error(format!("{:#}", e))
            }
        }
    }

    pub async fn get_snippet(&self, context: &str) -> String {
        let args = match parse_context(context) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let name = match required(&args, "snippetname") {
            Ok(n) => n,
            Err(e) => return e,
        };

        match self.snippets.get(name).await {
            Ok(Some(snippet)) => to_json(&SavedSnippet::from(snippet)),
            Ok(None) => error(format!("Snippet '{}' not found", name)),
            Err(e) => error(format!("{:#}", e)),
        }
    }

    pub async fn search_snippets(&self, context: &str) -> String {
        let args = match parse_context(context) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let query = match required(&args, "query") {
            Ok(q) => q,
            Err(e) => return e,
        };
        let project = optional(&args, "projectid").unwrap_or(DEFAULT_PROJECT);
        let k = args
            .get("k")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .map(|k| k as usize)
            .unwrap_or(self.default_top_k)
            .clamp(1, MAX_TOP_K);

        match self.snippets.search(query, project, k).await {
            Ok(hits) => {
                let results: Vec<Value> = hits
                    .into_iter()
                    .map(|h| json!({"id": h.id, "name": h.name, "score": h.score, "code": h.code}))
                    .collect();
                json!({"results": results}).to_string()
            }
            Err(e) => error(format!("{:#}", e)),
        }
    }

    pub async fn list_snippets(&self, context: &str) -> String {
        let args = match parse_context(context) {
            Ok(a) => a,
            Err(e) => return e,
        };
        let project = optional(&args, "projectid");

        match self.snippets.list(project).await {
            Ok(summaries) => json!({"snippets": summaries}).to_string(),
            Err(e) => error(format!("{:#}", e)),
        }
    }
}
