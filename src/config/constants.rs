// Project-wide constants
//
// Centralised here so ports, limits and default names have one
// source of truth. Import via `use crate::config::constants::*;`.

/// Default bind address for the HTTP host (same port the functions host used).
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:7071";

/// Default project when a request omits `projectId`.
pub const DEFAULT_PROJECT: &str = "default-project";

/// Default snippet name when an orchestration input omits `name`.
pub const DEFAULT_SNIPPET_NAME: &str = "unnamed";

/// Document type tag stored with every snippet.
pub const SNIPPET_DOC_TYPE: &str = "code-snippet";

/// Default chunk size (characters) for embedding fan-out.
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// Default number of nearest snippets used to ground an answer.
pub const DEFAULT_TOP_K: usize = 5;

/// Upper bound for a caller-supplied `top_k`.
pub const MAX_TOP_K: usize = 50;

/// Request body limit for the HTTP host.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Env prefix for layered configuration (`SNIPPY__SECTION__KEY`).
pub const ENV_PREFIX: &str = "SNIPPY";

/// Separator between env prefix, section and key.
pub const ENV_SEPARATOR: &str = "__";

/// File extensions accepted by the ingestion watcher.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    ".md", ".txt", ".py", ".js", ".ts", ".java", ".cpp", ".c", ".cs", ".go", ".rs", ".rb",
    ".php", ".sh", ".sql", ".json", ".xml", ".yaml", ".yml",
];

/// Orchestrator names registered by the host.
pub const EMBEDDINGS_ORCHESTRATOR: &str = "embeddings_orchestrator";
pub const MULTI_AGENT_ORCHESTRATOR: &str = "multi_agent_orchestrator";
