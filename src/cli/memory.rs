//! Local memory commands: `add`, `recall`, `reflect`.

use anyhow::{Context, Result};

use neuromem::config::NeuromemConfig;
use neuromem::memory::recall::{RecallOptions, ResultSource};
use neuromem::memory::search::truncate_preview;
use neuromem::memory::types::MemoryType;

use super::open_engine;

pub async fn add(config: &NeuromemConfig, owner: &str, content: &str, memory_type: Option<&str>) -> Result<()> {
    let memory_type = memory_type
        .map(|t| t.parse::<MemoryType>())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let engine = open_engine(config).await?;
    let memory = engine
        .add_memory(owner, content, memory_type, None)
        .await
        .context("failed to add memory")?;
    println!("Stored {} [{}]", memory.id, memory.memory_type);
    Ok(())
}

pub async fn recall(config: &NeuromemConfig, owner: &str, query: &str, limit: Option<usize>) -> Result<()> {
    let engine = open_engine(config).await?;
    let options = RecallOptions::with_limit(limit.unwrap_or(config.retrieval.default_limit));
    let result = engine.recall(owner, query, options).await.context("recall failed")?;

    if result.merged.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "{} result(s) ({} from memories, {} from the graph)\n",
        result.merged.len(),
        result.vector_results.len(),
        result.graph_results.len()
    );
    for (i, item) in result.merged.iter().enumerate() {
        let origin = match item.source {
            ResultSource::Vector => "memory",
            ResultSource::Graph => "graph",
        };
        println!("  {}. [{}/{}] score {:.4}", i + 1, origin, item.memory_type, item.score);
        println!("     {}", truncate_preview(&item.content, 120));
        println!();
    }
    Ok(())
}

pub async fn reflect(config: &NeuromemConfig, owner: &str, limit: Option<usize>) -> Result<()> {
    let engine = open_engine(config).await?;
    let result = engine.reflect(owner, limit).await.context("reflection failed")?;

    println!("Analyzed {} memories", result.memories_analyzed);
    println!("Generated {} insight(s)", result.insights_generated);
    for insight in &result.insights {
        println!("  - {}", insight.content);
    }
    if let Some(profile) = &result.emotion_profile {
        if let Some(state) = &profile.latest_state {
            println!("Latest state: {state}");
        }
    }

    engine.shutdown().await;
    Ok(())
}
