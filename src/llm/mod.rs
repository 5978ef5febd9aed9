//! Chat-completion collaborator used for extraction and reflection.
//!
//! The core treats the model as an opaque function from messages to text that
//! may fail or time out. There is no retry here; callers decide.

pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("llm returned no content")]
    EmptyResponse,

    #[error("{0}")]
    Provider(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

pub fn create_provider(config: &crate::config::LlmConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiChatProvider::new(config)?)),
        other => anyhow::bail!("unknown llm provider: {other}. Supported: openai"),
    }
}
