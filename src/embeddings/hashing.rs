// Offline hashed bag-of-words embedding
//
// Deterministic across runs and toolchains (SHA-256 per token), needs no
// model and no network. Used in mock mode and by tests.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingEngine;

pub const HASHING_DIMENSION: usize = 384;

/// Features per token; each token lights up this many buckets
const FEATURES_PER_TOKEN: usize = 4;

pub struct HashingEmbedding {
    dimension: usize,
}

impl HashingEmbedding {
    pub fn new() -> Self {
        Self {
            dimension: HASHING_DIMENSION,
        }
    }

    /// Lowercase identifier-ish tokens: letters, digits and underscores
    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        for token in Self::tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            for j in 0..FEATURES_PER_TOKEN {
                let bytes = [
                    digest[j * 4],
                    digest[j * 4 + 1],
                    digest[j * 4 + 2],
                    digest[j * 4 + 3],
                ];
                let idx = u32::from_le_bytes(bytes) as usize % self.dimension;
                embedding[idx] += 1.0;
            }
        }

        // Normalize to unit vector
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        embedding
    }
}

impl Default for HashingEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingEngine for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;

    #[test]
    fn test_embedding_dimension() {
        let engine = HashingEmbedding::new();
        assert_eq!(engine.dimension(), 384);
        assert_eq!(engine.embed_sync("Hello world").len(), 384);
    }

    #[test]
    fn test_deterministic() {
        let engine = HashingEmbedding::new();
        assert_eq!(engine.embed_sync("useState hook"), engine.embed_sync("useState hook"));
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let engine = HashingEmbedding::new();
        let a = engine.embed_sync("React useState(0);");
        let b = engine.embed_sync("react USESTATE 0");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_related_text_scores_higher() {
        let engine = HashingEmbedding::new();
        let query = engine.embed_sync("python async http aiohttp");
        let related = engine.embed_sync("async def fetch(url): async with aiohttp.ClientSession() as session");
        let unrelated = engine.embed_sync("const [count, setCount] = useState(0);");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_text_yields_empty_vector() {
        let engine = HashingEmbedding::new();
        assert!(engine.embed("").await.unwrap().is_empty());
    }
}
