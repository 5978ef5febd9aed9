//! Local ONNX Runtime embedding provider.
//!
//! Runs all-MiniLM-L6-v2 via `ort`: tokenization, inference, mean pooling and
//! L2 normalization. Inference is CPU-bound and runs on the blocking pool.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingError, EmbeddingProvider, LOCAL_EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

/// Maximum sequence length for all-MiniLM-L6-v2 (trained at 256).
const MAX_SEQ_LEN: usize = 256;

struct OnnxModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
unsafe impl Send for OnnxModel {}
unsafe impl Sync for OnnxModel {}

pub struct LocalEmbeddingProvider {
    model: Arc<OnnxModel>,
    model_name: String,
}

fn model_err(e: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::Model(e.to_string())
}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            config.dimensions == LOCAL_EMBEDDING_DIM,
            "local provider produces {LOCAL_EMBEDDING_DIM} dimensions, config asks for {}",
            config.dimensions
        );

        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `neuromem model download` first.",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `neuromem model download` first.",
            tokenizer_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self {
            model: Arc::new(OnnxModel {
                session: Mutex::new(session),
                tokenizer,
            }),
            model_name: config.model.clone(),
        })
    }
}

impl OnnxModel {
    fn run(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(model_err)?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            input_ids_flat.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask_flat.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids = Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))
            .map_err(model_err)?;
        let attention_mask =
            Tensor::from_array((shape.clone(), attention_mask_flat.clone().into_boxed_slice()))
                .map_err(model_err)?;
        // single-segment input
        let token_type_ids =
            Tensor::from_array((shape, vec![0i64; batch_size * seq_len].into_boxed_slice()))
                .map_err(model_err)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| model_err(format!("session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            })
            .map_err(model_err)?;

        // Output name varies by export.
        let token_emb_value = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (dims, data) = token_emb_value
            .try_extract_tensor::<f32>()
            .map_err(model_err)?;

        let dims: &[i64] = &dims;
        if dims.len() != 3 || dims[2] != LOCAL_EMBEDDING_DIM as i64 {
            return Err(model_err(format!(
                "unexpected token_embeddings shape {dims:?}, expected [batch, seq, {LOCAL_EMBEDDING_DIM}]"
            )));
        }
        let hidden_dim = dims[2] as usize;
        let actual_seq_len = dims[1] as usize;

        // Mean pooling over attended tokens.
        let mut results = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let mut sum = vec![0.0f32; hidden_dim];
            let mut count = 0.0f32;

            for s in 0..actual_seq_len {
                let mask = attention_mask_flat[b * seq_len + s] as f32;
                if mask > 0.0 {
                    let offset = (b * actual_seq_len + s) * hidden_dim;
                    for (d, acc) in sum.iter_mut().enumerate() {
                        *acc += data[offset + d] * mask;
                    }
                    count += mask;
                }
            }

            if count > 0.0 {
                sum.iter_mut().for_each(|x| *x /= count);
            }
            results.push(l2_normalize(&sum));
        }

        Ok(results)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Response("empty batch output".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.run(&texts))
            .await
            .map_err(model_err)?
    }

    fn dims(&self) -> usize {
        LOCAL_EMBEDDING_DIM
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "local".into(),
            ..Default::default()
        }
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn rejects_foreign_dimension() {
        let config = EmbeddingConfig {
            dimensions: 1536,
            ..test_config()
        };
        assert!(LocalEmbeddingProvider::new(&config).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires model files; run with: cargo test -- --ignored
    async fn test_embed_is_normalized_384_dims() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        let embedding = provider.embed("Hello world").await.unwrap();
        assert_eq!(embedding.len(), LOCAL_EMBEDDING_DIM);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "L2 norm should be ~1.0, got {norm}");
    }

    #[tokio::test]
    #[ignore]
    async fn test_similar_texts_have_high_cosine_similarity() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        let emb1 = provider.embed("The cat sat on the mat").await.unwrap();
        let emb2 = provider.embed("A cat was sitting on a mat").await.unwrap();
        let emb3 = provider.embed("Quantum computing uses qubits").await.unwrap();

        let sim_similar = cosine_similarity(&emb1, &emb2);
        let sim_different = cosine_similarity(&emb1, &emb3);
        assert!(sim_similar > 0.7, "got {sim_similar}");
        assert!(sim_different < sim_similar);
    }

    #[tokio::test]
    #[ignore]
    async fn test_empty_batch() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }
}
