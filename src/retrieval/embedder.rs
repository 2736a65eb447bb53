//! Text embedding contract.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::VikingResult;

use super::keyword::tokenize;

/// An embedding with dense and/or sparse components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dense: Vec<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sparse: HashMap<String, f64>,
}

impl EmbedResult {
    pub fn dense(vector: Vec<f64>) -> Self {
        Self {
            dense: vector,
            sparse: HashMap::new(),
        }
    }

    pub fn is_dense(&self) -> bool {
        !self.dense.is_empty()
    }

    pub fn is_sparse(&self) -> bool {
        !self.sparse.is_empty()
    }

    pub fn is_hybrid(&self) -> bool {
        self.is_dense() && self.is_sparse()
    }
}

/// Text embedding provider.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> VikingResult<EmbedResult>;

    async fn embed_batch(&self, texts: &[String]) -> VikingResult<Vec<EmbedResult>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize;

    /// Release resources. Must be idempotent.
    async fn close(&self) -> VikingResult<()> {
        Ok(())
    }
}

/// Deterministic local embedder: hashes tokens into a fixed number of
/// buckets with term-frequency weights, L2-normalized. No model, no network;
/// queries and documents sharing vocabulary land close in cosine space.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn bucket_of(token: &str, dimension: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

#[async_trait::async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> VikingResult<EmbedResult> {
        let mut vector = vec![0.0f64; self.dimension];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(EmbedResult::dense(vector));
        }
        for token in &tokens {
            vector[bucket_of(token, self.dimension)] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(EmbedResult::dense(vector))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
