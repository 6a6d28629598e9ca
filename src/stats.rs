//! Collection statistics and maintenance commands.
//!
//! `crag stats` summarises what is indexed: record counts, categories, the
//! embedding model and metric the collection was built with, and the size of
//! the database on disk. `crag reset` and `crag collections` live here too.

use anyhow::{Context, Result};
use compliance_rag_core::index::VectorIndex;

use crate::config::Config;
use crate::db;
use crate::sqlite_index::SqliteIndex;

async fn open(config: &Config) -> Result<SqliteIndex> {
    SqliteIndex::from_config(config)
        .await
        .with_context(|| format!("Failed to open collection '{}'", config.index.collection))
}

/// Create the persist directory, schema and collection.
pub async fn run_init(config: &Config) -> Result<()> {
    let index = open(config).await?;
    println!(
        "Collection '{}' ready at {}",
        index.collection(),
        db::database_path(&config.index.persist_dir).display()
    );
    index.close().await;
    Ok(())
}

/// Print a summary of the configured collection.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let index = open(config).await?;
    let stats = index.stats().await?;
    index.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let db_path = db::database_path(&config.index.persist_dir);
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    println!("Compliance RAG — Collection Stats");
    println!("=================================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Collection:  {}", stats.collection);
    println!("  Metric:      {}", stats.metric);
    println!(
        "  Model:       {}",
        stats.embedding_model.as_deref().unwrap_or("(none)")
    );
    println!(
        "  Dimensions:  {}",
        stats
            .dims
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!();
    println!("  Records:     {}", stats.total_records);
    if stats.categories.is_empty() {
        println!("  Categories:  (none)");
    } else {
        println!("  Categories:  {}", stats.categories.join(", "));
    }
    println!();
    Ok(())
}

/// Discard every record in the configured collection.
pub async fn run_reset(config: &Config) -> Result<()> {
    let index = open(config).await?;
    let before = index.count().await?;
    index.reset().await?;
    index.close().await;
    println!(
        "reset {}: removed {} records",
        config.index.collection, before
    );
    Ok(())
}

/// List every collection in the persist directory.
pub async fn run_collections(config: &Config) -> Result<()> {
    let index = open(config).await?;
    let collections = index.list_collections().await?;
    index.close().await;

    println!(
        "  {:<24} {:>8} {:>6} {:<10} {}",
        "COLLECTION", "RECORDS", "DIMS", "METRIC", "MODEL"
    );
    println!("  {}", "-".repeat(72));
    for c in &collections {
        println!(
            "  {:<24} {:>8} {:>6} {:<10} {}",
            c.name,
            c.records,
            c.dims.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            c.metric,
            c.embedding_model.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
