//! Query-time retrieval and context assembly.
//!
//! The [`Retriever`] embeds a question with the injected [`Embedder`], asks
//! the [`VectorIndex`] for the nearest chunks, and renders them into the
//! numbered context block handed to the answer generator:
//!
//! ```text
//! [Source 1] — cleaning-validation.pdf (relevance: 87%)
//! <chunk text>
//! ---
//! [Source 2] — annex-11.docx (relevance: 74%)
//! <chunk text>
//! ```
//!
//! Answers cite sources as `[Source N]`; [`cited_sources`] maps them back to
//! result positions.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::{IndexStats, VectorIndex};
use crate::models::{MetadataFilter, SearchResponse, SearchResult};

/// Delimiter between source blocks in a rendered context.
pub const CONTEXT_DELIMITER: &str = "\n---\n";

const SOURCE_TAG: &str = "[Source ";

/// Everything the answer generator consumes for one question.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedContext {
    pub question: String,
    pub results: Vec<SearchResult>,
    pub context: String,
}

/// Read-only query path over an embedder and a vector index.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Top-`top_k` chunks for `query`, optionally restricted to one category.
    ///
    /// A blank `category` means no filter. An empty index yields zero
    /// results. Embedder failures propagate unchanged.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        category: Option<&str>,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(Error::invalid_argument("query text must not be blank"));
        }
        if top_k == 0 {
            return Err(Error::invalid_argument("top_k must be a positive integer"));
        }

        let filter = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(MetadataFilter::category);

        let vector = self.embedder.embed_query(query).await?;
        let results = self.index.query(&vector, top_k, filter.as_ref()).await?;
        debug!(
            query,
            top_k,
            category = ?category,
            hits = results.len(),
            "retrieval complete"
        );

        Ok(SearchResponse {
            query: query.to_string(),
            num_results: results.len(),
            results,
        })
    }

    /// Rendered context block for the top-`top_k` chunks.
    pub async fn get_context(&self, query: &str, top_k: usize) -> Result<String> {
        let response = self.search(query, top_k, None).await?;
        Ok(render_context(&response.results))
    }

    /// Question, ranked results and rendered context in one call.
    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
        category: Option<&str>,
    ) -> Result<RetrievedContext> {
        let response = self.search(question, top_k, category).await?;
        let context = render_context(&response.results);
        Ok(RetrievedContext {
            question: response.query,
            results: response.results,
            context,
        })
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.index.stats().await
    }
}

/// Render ranked results as numbered, source-attributed blocks.
pub fn render_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}{}] — {} (relevance: {}%)\n{}",
                SOURCE_TAG,
                i + 1,
                r.metadata.filename,
                (r.relevance_score * 100.0).round() as i64,
                r.text
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

/// Source numbers cited as `[Source N]` in `text`, sorted and deduplicated.
pub fn cited_sources(text: &str) -> Vec<usize> {
    let mut cited = BTreeSet::new();
    let mut rest = text;
    while let Some(pos) = rest.find(SOURCE_TAG) {
        rest = &rest[pos + SOURCE_TAG.len()..];
        let digits: &str = &rest[..rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len())];
        if !digits.is_empty() && rest[digits.len()..].starts_with(']') {
            if let Ok(n) = digits.parse::<usize>() {
                cited.insert(n);
            }
        }
    }
    cited.into_iter().collect()
}
