//! `crag search` and `crag context`.
//!
//! Both commands embed the question with the configured embedder and query
//! the persistent collection through a [`Retriever`]. Output goes to stdout;
//! logs go to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use compliance_rag_core::models::SearchResponse;
use compliance_rag_core::retriever::Retriever;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_index::SqliteIndex;

/// Retriever over the configured embedder and collection.
pub async fn open_retriever(config: &Config) -> Result<Retriever> {
    let embedder = create_embedder(&config.embedding)
        .await
        .context("Failed to initialise embedding model")?;
    let index = SqliteIndex::from_config(config)
        .await
        .with_context(|| format!("Failed to open collection '{}'", config.index.collection))?;
    Ok(Retriever::new(embedder, Arc::new(index)))
}

pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    category: Option<String>,
    json: bool,
) -> Result<()> {
    let retriever = open_retriever(config).await?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let response = retriever.search(query, top_k, category.as_deref()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_results(&response);
    }
    Ok(())
}

pub async fn run_context(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let retriever = open_retriever(config).await?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let context = retriever.get_context(query, top_k).await?;

    if context.is_empty() {
        println!("No results.");
    } else {
        println!("{}", context);
    }
    Ok(())
}

fn print_results(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.relevance_score,
            result.metadata.category,
            result.metadata.filename
        );
        println!("    source: {}", result.metadata.source);
        println!("    distance: {:.4}", result.distance);
        println!("    excerpt: \"{}\"", excerpt(&result.text, 200));
        println!("    id: {}", result.id);
        println!();
    }
}

/// First `max_chars` characters of `text` on one line.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_flattens_whitespace() {
        assert_eq!(excerpt("21 CFR\n\nPart  11", 200), "21 CFR Part 11");
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let text = "é".repeat(300);
        let out = excerpt(&text, 10);
        assert_eq!(out.chars().count(), 11);
        assert!(out.ends_with('…'));
    }
}
