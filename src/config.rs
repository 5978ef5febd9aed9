use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::memory::scoring::DEFAULT_DECAY_RATE_SECS;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NeuromemConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub extraction: ExtractionConfig,
    pub reflection: ReflectionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub cache_dir: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    pub decay_rate_secs: f64,
    pub candidate_multiplier: usize,
    pub rrf_k: usize,
    pub graph_enabled: bool,
    pub graph_boost: bool,
    pub temporal_filter: bool,
}

/// When extraction fires. A zero interval or timeout disables that trigger.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    pub message_interval: usize,
    pub idle_timeout_secs: u64,
    pub batch_size: usize,
    pub extract_on_session_close: bool,
    pub extract_on_shutdown: bool,
    pub reflection_interval: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReflectionConfig {
    pub batch_size: usize,
    pub insight_importance: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 8765,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_neuromem_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_neuromem_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            dimensions: 384,
            cache_dir,
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            temperature: 0.1,
            max_tokens: 2048,
            timeout_secs: 60,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            decay_rate_secs: DEFAULT_DECAY_RATE_SECS,
            candidate_multiplier: 4,
            rrf_k: 60,
            graph_enabled: true,
            graph_boost: true,
            temporal_filter: false,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            message_interval: 10,
            idle_timeout_secs: 600,
            batch_size: 50,
            extract_on_session_close: true,
            extract_on_shutdown: true,
            reflection_interval: 0,
        }
    }
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            insight_importance: 8,
        }
    }
}

impl ExtractionConfig {
    /// Idle window before an idle-triggered extraction, if enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// Returns `~/.neuromem/`, or `./.neuromem` when no home directory is known.
pub fn default_neuromem_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".neuromem")
}

/// Returns the default config file path: `~/.neuromem/config.toml`
pub fn default_config_path() -> PathBuf {
    default_neuromem_dir().join("config.toml")
}

impl NeuromemConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            NeuromemConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NEUROMEM_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("NEUROMEM_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("NEUROMEM_LLM_API_KEY") {
            self.llm.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("NEUROMEM_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(val);
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = NeuromemConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.retrieval.rrf_k, 60);
        assert_eq!(config.retrieval.decay_rate_secs, 86_400.0 * 30.0);
        assert_eq!(config.extraction.message_interval, 10);
        assert_eq!(config.embedding.dimensions, 384);
        assert!(config.storage.db_path.ends_with("memory.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"

[extraction]
message_interval = 3
idle_timeout_secs = 0

[retrieval]
default_limit = 10
graph_boost = false
"#;
        let config: NeuromemConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.extraction.message_interval, 3);
        assert!(config.extraction.idle_timeout().is_none());
        assert_eq!(config.retrieval.default_limit, 10);
        assert!(!config.retrieval.graph_boost);
        // defaults still apply for unset fields
        assert_eq!(config.retrieval.rrf_k, 60);
        assert!(config.extraction.extract_on_shutdown);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = NeuromemConfig::default();
        std::env::set_var("NEUROMEM_DB", "/tmp/override.db");
        std::env::set_var("NEUROMEM_LOG_LEVEL", "trace");
        std::env::set_var("NEUROMEM_LLM_API_KEY", "sk-test");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));

        // Clean up
        std::env::remove_var("NEUROMEM_DB");
        std::env::remove_var("NEUROMEM_LOG_LEVEL");
        std::env::remove_var("NEUROMEM_LLM_API_KEY");
    }
}
