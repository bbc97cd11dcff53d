// Embedding engines and vector math
//
// `HashingEmbedding` runs offline (mock mode and tests); `OpenAiEmbedding`
// talks to any OpenAI-compatible /v1/embeddings endpoint.

mod chunking;
mod hashing;
mod openai;

pub use chunking::chunk_text;
pub use hashing::{HashingEmbedding, HASHING_DIMENSION};
pub use openai::OpenAiEmbedding;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

use crate::config::Settings;

/// Trait for embedding engines
#[async_trait]
pub trait EmbeddingEngine: Send + Sync {
    /// Generate embedding for text. Empty text yields an empty vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Pick the engine for the current settings
pub fn build(settings: &Settings) -> Result<Arc<dyn EmbeddingEngine>> {
    match (&settings.llm.api_key, settings.llm.mock) {
        (Some(key), false) => {
            let engine = OpenAiEmbedding::new(
                key.clone(),
                settings.llm.base_url.clone(),
                settings.llm.embedding_model.clone(),
            )?;
            tracing::info!(model = %settings.llm.embedding_model, "Using OpenAI-compatible embeddings");
            Ok(Arc::new(engine))
        }
        _ => {
            tracing::info!("Using offline hashing embeddings (mock mode)");
            Ok(Arc::new(HashingEmbedding::new()))
        }
    }
}

/// Calculate cosine similarity between two vectors.
///
/// Returns 0.0 when lengths differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Component-wise mean of non-empty vectors, without re-normalisation
pub fn mean_embedding(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let mut present = vectors.iter().filter(|v| !v.is_empty());

    let Some(first) = present.next() else {
        return Ok(Vec::new());
    };

    let dim = first.len();
    let mut sum = first.clone();
    let mut count = 1usize;

    for v in present {
        if v.len() != dim {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                dim,
                v.len()
            );
        }
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
        count += 1;
    }

    let n = count as f32;
    Ok(sum.into_iter().map(|x| x / n).collect())
}

/// Chunk, embed every chunk concurrently, then average.
///
/// A chunk whose embedding fails is logged and skipped.
pub async fn embed_chunked(
    engine: &dyn EmbeddingEngine,
    text: &str,
    chunk_size: usize,
) -> Result<Vec<f32>> {
    let chunks = chunk_text(text, chunk_size);
    let results = join_all(chunks.iter().map(|c| engine.embed(c))).await;

    let mut vectors = Vec::with_capacity(results.len());
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(v) => vectors.push(v),
            Err(e) => tracing::warn!(chunk = index, "Embedding chunk failed: {:#}", e),
        }
    }

    mean_embedding(&vectors)
}
