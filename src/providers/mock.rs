// Deterministic offline chat provider
//
// Answers RAG prompts by quoting the snippet ids found in the prompt, so
// citations can be checked end to end without a model.

use anyhow::Result;
use async_trait::async_trait;

use super::types::{ChatRequest, ChatResponse, Usage};
use super::ChatProvider;

#[derive(Debug, Clone, Default)]
pub struct MockChatProvider;

impl MockChatProvider {
    pub fn new() -> Self {
        Self
    }

    /// Ids heading each context block after `Snippets:`, in prompt order,
    /// deduplicated. A header is a line holding only `[id]`.
    fn cited_ids(prompt: &str) -> Vec<String> {
        let Some((_, context)) = prompt.split_once("Snippets:\n") else {
            return Vec::new();
        };

        let mut ids: Vec<String> = Vec::new();
        for block in context.split("\n---\n") {
            let header = block.lines().next().unwrap_or("").trim();
            let id = header
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .filter(|id| !id.is_empty() && !id.contains(['[', ']']));
            if let Some(id) = id {
                if !ids.iter().any(|i| i == id) {
                    ids.push(id.to_string());
                }
            }
        }
        ids
    }

    fn question(prompt: &str) -> &str {
        prompt
            .lines()
            .find_map(|l| l.strip_prefix("Question:"))
            .map(str::trim)
            .unwrap_or("")
    }
}

fn approx_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let prompt = request.last_user_message().unwrap_or("");
        let ids = Self::cited_ids(prompt);
        let question = Self::question(prompt);

        let text = if ids.is_empty() {
            format!("No stored snippets match \"{}\".", question)
        } else {
            let cited = ids
                .iter()
                .map(|id| format!("[{}]", id))
                .collect::<Vec<_>>()
                .join(", ");
            format!("Answer to \"{}\" based on snippets {}.", question, cited)
        };

        let prompt_tokens: u64 = request.messages.iter().map(|m| approx_tokens(&m.content)).sum();
        let completion_tokens = approx_tokens(&text);

        Ok(ChatResponse {
            text,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model: "mock".to_string(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
