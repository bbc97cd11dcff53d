// Retrieval-augmented answers with citations
//
// Embed the question, pull the nearest snippets of the project, and ask the
// chat provider to answer from them. Provider failures degrade to an empty
// answer with the error in `usage`; retrieval failures are errors.

use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::providers::{ChatProvider, ChatRequest};
use crate::storage::{SearchHit, SnippetService};

pub const SYSTEM_PROMPT: &str =
    "You are a concise assistant. Answer using provided snippets. Cite ids.";

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub id: String,
    pub name: String,
    pub score: f32,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub usage: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("question is required")]
    EmptyQuestion,
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),
}

/// `Question: ...` followed by each snippet as `[id]` + code, separated by `---`
pub fn build_prompt(question: &str, hits: &[SearchHit]) -> String {
    let contexts: Vec<String> = hits
        .iter()
        .map(|h| format!("[{}]\n{}", h.id, h.code))
        .collect();
    format!("Question: {}\n\nSnippets:\n{}", question, contexts.join("\n---\n"))
}

pub struct RagEngine<'a> {
    pub snippets: &'a SnippetService,
    pub chat: &'a dyn ChatProvider,
    pub temperature: f32,
    pub timeout: Duration,
}

impl RagEngine<'_> {
    pub async fn answer(&self, question: &str, project: &str, k: usize) -> Result<RagAnswer, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyQuestion);
        }

        let hits = self
            .snippets
            .search(question, project, k)
            .await
            .map_err(RagError::Retrieval)?;

        tracing::info!(project, k, hits = hits.len(), "Grounding query");

        let request = ChatRequest::new(SYSTEM_PROMPT, build_prompt(question, &hits))
            .with_temperature(self.temperature);

        let (answer, usage) = match tokio::time::timeout(self.timeout, self.chat.complete(&request)).await {
            Ok(Ok(response)) => (response.text, json!(response.usage)),
            Ok(Err(e)) => {
                tracing::error!("Chat completion failed: {:#}", e);
                (String::new(), json!({"error": format!("{:#}", e)}))
            }
            Err(_) => {
                tracing::error!(timeout = ?self.timeout, "Chat completion timed out");
                (
                    String::new(),
                    json!({"error": format!("chat completion timed out after {}s", self.timeout.as_secs())}),
                )
            }
        };

        let citations = hits
            .into_iter()
            .map(|h| Citation {
                id: h.id,
                name: h.name,
                score: h.score,
                code: h.code,
            })
            .collect();

        Ok(RagAnswer {
            answer,
            citations,
            usage,
        })
    }
}
