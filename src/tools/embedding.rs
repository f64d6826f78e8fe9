//! Embedding Provider
//!
//! Maps batches of strings to fixed-dimension unit vectors for the
//! registry's semantic index. The default backend is a local fastembed
//! model, lazily initialized so it can be released under memory pressure.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::agent::{AgentError, AgentResult};

/// Batch text-embedding backend. Outputs must be L2-normalized so cosine
/// similarity reduces to a dot product.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identity of the embedding model, part of the index cache key.
    fn id(&self) -> String;

    /// Output dimension, part of the index cache key.
    fn dim(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> AgentResult<Vec<Vec<f32>>>;
}

/// Local fastembed backend (AllMiniLML6V2, 384 dims).
pub struct FastembedEmbedder {
    inner: Arc<RwLock<Option<TextEmbedding>>>,
}

impl FastembedEmbedder {
    pub fn new() -> AgentResult<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
            .map_err(|e| AgentError::Llm(format!("embedding model init: {}", e)))?;
        info!("Embedding model initialized (AllMiniLML6V2)");
        Ok(Self {
            inner: Arc::new(RwLock::new(Some(model))),
        })
    }

    /// Drop the model weights; they are re-created on next use.
    pub async fn hibernate(&self) {
        *self.inner.write().await = None;
    }

    fn normalize(vec: &mut Vec<f32>) {
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vec {
                *x /= norm;
            }
        }
    }
}

#[async_trait]
impl Embedder for FastembedEmbedder {
    fn id(&self) -> String {
        "fastembed:all-minilm-l6-v2".to_string()
    }

    fn dim(&self) -> usize {
        384
    }

    async fn embed(&self, texts: &[String]) -> AgentResult<Vec<Vec<f32>>> {
        {
            let read_guard = self.inner.read().await;
            if read_guard.is_none() {
                drop(read_guard);
                let mut write_guard = self.inner.write().await;
                if write_guard.is_none() {
                    *write_guard = Some(
                        TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
                            .map_err(|e| AgentError::Llm(format!("embedding re-init: {}", e)))?,
                    );
                }
            }
        }
        let mut lock = self.inner.write().await;
        let model = lock.as_mut().expect("embedder initialized above");
        let mut embeddings = model
            .embed(texts.to_vec(), None)
            .map_err(|e| AgentError::Llm(format!("embedding: {}", e)))?;
        for emb in &mut embeddings {
            Self::normalize(emb);
        }
        Ok(embeddings)
    }
}

/// Inner product of two L2-normalized vectors.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((dot_product(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(dot_product(&a, &c).abs() < 0.001);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        FastembedEmbedder::normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }
}
