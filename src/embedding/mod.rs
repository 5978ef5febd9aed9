//! Text-to-vector embedding gateway.
//!
//! Provides the [`EmbeddingProvider`] trait plus a local ONNX implementation
//! (all-MiniLM-L6-v2, 384 dimensions) and an OpenAI-compatible HTTP
//! implementation. The provider is created via [`create_provider`] from
//! configuration. Every vector handed to the store is L2-normalized and exactly
//! [`EmbeddingProvider::dims`] long.

pub mod local;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;

/// Number of dimensions produced by the bundled local model.
pub const LOCAL_EMBEDDING_DIM: usize = 384;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("expected {expected}-dimensional embedding, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding model error: {0}")]
    Model(String),

    #[error("malformed embedding response: {0}")]
    Response(String),
}

/// Uniform async interface over an external embedding model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts. The default issues sequential single calls.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Dimension of every vector this provider produces. Fixed at startup.
    fn dims(&self) -> usize;

    /// Identifier recorded alongside stored vectors.
    fn model_name(&self) -> &str;
}

/// Reject vectors whose length differs from the deployment dimension.
pub fn check_dims(expected: usize, vector: &[f32]) -> Result<(), EmbeddingError> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(EmbeddingError::Dimension {
            expected,
            actual: vector.len(),
        })
    }
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Create an embedding provider from config.
///
/// `"local"` needs model files on disk (`neuromem model download`);
/// `"openai"` talks to any OpenAI-compatible `/embeddings` endpoint.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Arc::new(provider))
        }
        "openai" => {
            let provider = openai::OpenAiEmbeddingProvider::new(config)?;
            Ok(Arc::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local, openai"),
    }
}
