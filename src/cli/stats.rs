use anyhow::Result;

use neuromem::config::NeuromemConfig;
use neuromem::memory::types::MemoryType;

/// Print one owner's statistics.
pub fn stats(config: &NeuromemConfig, owner: &str) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = neuromem::db::open_database(&db_path)?;

    let response = neuromem::memory::stats::memory_stats(&conn, owner, Some(&db_path))?;

    println!("Memory statistics for {owner}");
    println!("{}", "=".repeat(40));
    println!("  Total memories:      {}", response.total_memories);
    println!();

    println!("By type:");
    for t in MemoryType::ALL.iter().filter(|t| **t != MemoryType::GraphFact) {
        let count = response.by_type.get(t.as_str()).copied().unwrap_or(0);
        println!("  {:<12} {}", t.as_str(), count);
    }
    println!();

    println!("Graph nodes:           {}", response.graph_nodes);
    println!("Graph edges:           {} ({} active)", response.graph_edges, response.active_edges);
    println!(
        "Conversation turns:    {} ({} unextracted)",
        response.conversation_turns, response.unextracted_turns
    );
    println!("Database size:         {} bytes", response.db_size_bytes);

    if let Some(ref oldest) = response.oldest_memory {
        println!("Oldest memory:         {oldest}");
    }
    if let Some(ref newest) = response.newest_memory {
        println!("Newest memory:         {newest}");
    }

    Ok(())
}
