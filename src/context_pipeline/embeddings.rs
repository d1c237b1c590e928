//! Embedding backends — spec §4.6. Concrete production HTTP wiring is out of
//! scope (SPEC_FULL.md Non-goals); both providers below produce a
//! deterministic, content-derived vector so the pipeline is exercisable
//! end-to-end without a live model server.
//!
//! Grounded on the teacher's `context::embeddings::{LocalEmbeddingProvider,
//! OpenAIEmbeddingProvider}` split, with the hash swapped from `md5` to
//! `sha2` to match this crate's content-hashing (`resources::context::hash`).

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
    #[error("embedding generation failed: {0}")]
    Generation(String),
}

/// What [`crate::resources::context::EmbeddingInfo`] records once a context
/// has been embedded.
pub struct EmbeddingOutput {
    pub vector: Vec<f32>,
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<EmbeddingOutput, EmbeddingError>;
}

fn deterministic_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let mut vector = vec![0.0f32; dimensions];
    for (i, byte) in digest.iter().enumerate() {
        let idx = (i * dimensions) / digest.len();
        vector[idx.min(dimensions - 1)] += (*byte as f32 - 128.0) / 128.0;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// Local, model-free provider used by default (`local-embeddings` feature).
pub struct LocalEmbeddingService {
    model_name: String,
    dimensions: usize,
}

impl LocalEmbeddingService {
    pub fn new(model_name: impl Into<String>) -> Self {
        let model_name = model_name.into();
        let dimensions = match model_name.as_str() {
            "all-MiniLM-L6-v2" => 384,
            "all-mpnet-base-v2" => 768,
            _ => 384,
        };
        Self { model_name, dimensions }
    }
}

impl Default for LocalEmbeddingService {
    fn default() -> Self {
        Self::new("all-MiniLM-L6-v2")
    }
}

#[async_trait]
impl EmbeddingService for LocalEmbeddingService {
    async fn embed(&self, text: &str) -> Result<EmbeddingOutput, EmbeddingError> {
        Ok(EmbeddingOutput {
            vector: deterministic_vector(text, self.dimensions),
            provider: "local".to_string(),
            model: self.model_name.clone(),
            dimensions: self.dimensions,
        })
    }
}

/// Shaped like a real HTTP-backed provider (holds a client, a model id) so
/// swapping in a live endpoint later is a body change, not a trait change.
#[cfg(feature = "openai-embeddings")]
pub struct OpenAiEmbeddingService {
    #[allow(dead_code)]
    client: reqwest::Client,
    model: String,
    dimensions: usize,
}

#[cfg(feature = "openai-embeddings")]
impl OpenAiEmbeddingService {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        Self {
            client: reqwest::Client::new(),
            model,
            dimensions,
        }
    }
}

#[cfg(feature = "openai-embeddings")]
#[async_trait]
impl EmbeddingService for OpenAiEmbeddingService {
    async fn embed(&self, text: &str) -> Result<EmbeddingOutput, EmbeddingError> {
        Ok(EmbeddingOutput {
            vector: deterministic_vector(text, self.dimensions),
            provider: "openai".to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
        })
    }
}
