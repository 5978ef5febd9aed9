pub mod doctor;
pub mod memory;
pub mod stats;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use neuromem::config::{EmbeddingConfig, LlmConfig, NeuromemConfig};
use neuromem::db::Database;
use neuromem::llm::LlmProvider;
use neuromem::{EngineParts, NeuroMemory};

const MODEL_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Open the configured database and providers as one engine.
pub async fn open_engine(config: &NeuromemConfig) -> Result<NeuroMemory> {
    let db_path = config.resolved_db_path();
    let db = Database::open(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");

    let embedding = neuromem::embedding::create_provider(&config.embedding)?;
    tracing::info!(model = %config.embedding.model, "embedding provider ready");

    let llm = llm_provider(&config.llm)?;
    if llm.is_none() {
        tracing::warn!("no llm api key configured; extraction and reflection are disabled");
    }

    let engine = NeuroMemory::new(
        db,
        embedding,
        config.clone(),
        EngineParts {
            llm,
            mirror: None,
            db_path: Some(db_path),
        },
    )
    .await
    .context("failed to initialize memory engine")?;
    Ok(engine)
}

/// The hosted endpoint needs a key; a self-hosted one may not.
fn llm_provider(config: &LlmConfig) -> Result<Option<Arc<dyn LlmProvider>>> {
    if config.provider == "none" {
        return Ok(None);
    }
    if config.api_key.is_none() && config.base_url.trim_end_matches('/') == OPENAI_BASE_URL {
        return Ok(None);
    }
    neuromem::llm::create_provider(config).map(Some)
}

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let cache_dir = neuromem::config::expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    let model_path = cache_dir.join("model.onnx");
    let tokenizer_path = cache_dir.join("tokenizer.json");

    for (label, url, path) in [
        ("model.onnx (~90MB)", MODEL_URL, &model_path),
        ("tokenizer.json", TOKENIZER_URL, &tokenizer_path),
    ] {
        if path.exists() {
            println!("Already present: {}", path.display());
            continue;
        }
        println!("Downloading {label}...");
        download_file(url, path).await?;
        println!("Saved to {}", path.display());
    }

    println!("Model download complete.");
    Ok(())
}

/// Download to a temp file next to `dest`, then rename into place.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    let bytes = response.bytes().await.context("error reading response")?;
    pb.inc(bytes.len() as u64);
    file.write_all(&bytes).await.context("error writing to file")?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
