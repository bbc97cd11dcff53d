// Chat completion providers
//
// One trait over the OpenAI-compatible HTTP provider and the offline mock,
// so RAG and agent code never care which one is wired in.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

mod mock;
mod openai;
pub mod types;

pub use mock::MockChatProvider;
pub use openai::OpenAiChatProvider;
pub use types::{ChatMessage, ChatRequest, ChatResponse, Usage};

use crate::config::Settings;

/// Trait for chat completion providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a request and wait for the full response
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Provider name (e.g., "openai", "mock")
    fn name(&self) -> &str;
}

/// Create the provider for the current settings
pub fn build(settings: &Settings) -> Result<Arc<dyn ChatProvider>> {
    match (&settings.llm.api_key, settings.llm.mock) {
        (Some(key), false) => {
            let provider = OpenAiChatProvider::new(
                key.clone(),
                settings.llm.base_url.clone(),
                settings.llm.chat_model.clone(),
            )?
            .with_temperature(settings.llm.temperature);
            tracing::info!(model = %settings.llm.chat_model, "Using OpenAI-compatible chat provider");
            Ok(Arc::new(provider))
        }
        _ => Ok(Arc::new(MockChatProvider::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_selects_mock_without_key() {
        let settings = Settings::default();
        assert_eq!(build(&settings).unwrap().name(), "mock");
    }

    #[test]
    fn test_build_selects_http_with_key() {
        let mut settings = Settings::default();
        settings.llm.api_key = Some("sk-test".to_string());
        assert_eq!(build(&settings).unwrap().name(), "openai");
    }

    #[test]
    fn test_mock_flag_wins_over_key() {
        let mut settings = Settings::default();
        settings.llm.api_key = Some("sk-test".to_string());
        settings.llm.mock = true;
        assert_eq!(build(&settings).unwrap().name(), "mock");
    }
}
