//! CLI `doctor` command: database diagnostics.

use anyhow::{Context, Result};

use neuromem::config::NeuromemConfig;
use neuromem::db;

pub fn doctor(config: &NeuromemConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `neuromem serve` or `neuromem add` to create it.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("neuromem health report");
    println!("======================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("sqlite-vec:        v{}", report.sqlite_vec_version);
    println!();
    println!("Embedding model:");
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {}", config.embedding.model);
    match report.embedding_dims {
        Some(dims) if dims != config.embedding.dimensions => {
            println!(
                "  ERROR: stored vectors are {dims}-dimensional, provider is configured for {}",
                config.embedding.dimensions
            );
        }
        Some(dims) => println!("  Dimensions:      {dims}"),
        None => println!("  Dimensions:      (not set)"),
    }
    println!();
    println!("Row counts:");
    println!("  Memories:        {}", report.memory_count);
    println!("  Turns:           {} ({} unextracted)", report.conversation_count, report.unextracted_count);
    println!("  Graph nodes:     {}", report.node_count);
    println!("  Graph edges:     {}", report.edge_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Restore from a backup copy of {} and rerun doctor.", db_path.display());
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
