#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use neuromem::config::NeuromemConfig;
use neuromem::db::Database;
use neuromem::embedding::{l2_normalize, EmbeddingError, EmbeddingProvider};
use neuromem::graph::{GraphEdge, GraphMirror, MirrorError};
use neuromem::llm::{ChatMessage, LlmError, LlmProvider};
use neuromem::{EngineParts, NeuroMemory};

pub const HASH_DIM: usize = 64;

/// Bag-of-words embedder: each lowercase token is hashed (FNV-1a) into one
/// bucket. Texts sharing words get high cosine similarity.
pub struct HashEmbedder {
    dims: usize,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::with_dims(HASH_DIM)
    }

    pub fn with_dims(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
        }
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

pub fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let bucket = (fnv1a(&token.to_lowercase()) % dims as u64) as usize;
        v[bucket] += 1.0;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[0] = 1.0;
    }
    l2_normalize(&v)
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(hash_embed(text, self.dims))
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }
}

/// Answers by the first rule whose marker occurs in the prompt, else with
/// the default reply. Records every prompt it receives.
pub struct ScriptedLlm {
    rules: Mutex<Vec<(String, String)>>,
    default_reply: Mutex<Option<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_reply: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply used when no rule matches. `None` makes the call fail.
    pub fn set_default(&self, reply: Option<&str>) {
        *self.default_reply.lock().unwrap() = reply.map(str::to_string);
    }

    pub fn on(&self, marker: &str, reply: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((marker.to_string(), reply.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts_containing(&self, marker: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(marker))
            .count()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat(&self, messages: &[ChatMessage], _temperature: f32, _max_tokens: u32) -> Result<String, LlmError> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt.clone());

        let rules = self.rules.lock().unwrap();
        if let Some((_, reply)) = rules.iter().find(|(marker, _)| prompt.contains(marker.as_str())) {
            return Ok(reply.clone());
        }
        self.default_reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| LlmError::Provider("scripted failure".into()))
    }
}

/// Marker present only in extraction prompts.
pub const EXTRACTION_MARKER: &str = "Extract structured memories";
/// Marker present only in insight prompts.
pub const INSIGHT_MARKER: &str = "\"insights\"";
/// Marker present only in emotion-summary prompts.
pub const EMOTION_MARKER: &str = "\"latest_state\"";

/// Config with automatic triggers off, so tests decide when extraction runs.
pub fn quiet_config() -> NeuromemConfig {
    let mut config = NeuromemConfig::default();
    config.extraction.message_interval = 0;
    config.extraction.idle_timeout_secs = 0;
    config.extraction.extract_on_session_close = false;
    config.extraction.extract_on_shutdown = false;
    config
}

pub async fn engine_without_llm(config: NeuromemConfig) -> NeuroMemory {
    let db = Database::open_in_memory().unwrap();
    NeuroMemory::new(db, Arc::new(HashEmbedder::new()), config, EngineParts::default())
        .await
        .unwrap()
}

pub async fn engine_with_llm(config: NeuromemConfig, llm: Arc<ScriptedLlm>) -> NeuroMemory {
    let db = Database::open_in_memory().unwrap();
    NeuroMemory::new(
        db,
        Arc::new(HashEmbedder::new()),
        config,
        EngineParts {
            llm: Some(llm as Arc<dyn LlmProvider>),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

/// Mirror that records `(target, active)` for every edge it is sent.
#[derive(Default)]
pub struct RecordingMirror {
    seen: Mutex<Vec<(String, bool)>>,
}

impl RecordingMirror {
    pub fn seen(&self) -> Vec<(String, bool)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphMirror for RecordingMirror {
    async fn mirror_edges(&self, _owner: &str, edges: &[GraphEdge]) -> Result<(), MirrorError> {
        let mut seen = self.seen.lock().unwrap();
        seen.extend(edges.iter().map(|e| (e.target.node_id.clone(), e.validity.is_active())));
        Ok(())
    }
}

pub async fn engine_with_mirror(config: NeuromemConfig, mirror: Arc<RecordingMirror>) -> NeuroMemory {
    let db = Database::open_in_memory().unwrap();
    NeuroMemory::new(
        db,
        Arc::new(HashEmbedder::new()),
        config,
        EngineParts {
            mirror: Some(mirror as Arc<dyn GraphMirror>),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}
