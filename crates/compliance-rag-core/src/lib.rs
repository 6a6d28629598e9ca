//! # Compliance RAG Core
//!
//! Runtime-agnostic retrieval logic for Compliance RAG: data models, the
//! error taxonomy, overlapping text chunking, the embedder and vector-index
//! abstractions, and query-time retrieval with context assembly.
//!
//! This crate contains no SQL, filesystem I/O, or model runtimes. The
//! application crate supplies the persistent index, the document extractors,
//! and the neural embedder, and injects them through the [`embedding::Embedder`]
//! and [`index::VectorIndex`] traits.
//!
//! ```text
//! text ──▶ Chunker ──▶ Embedder ──▶ VectorIndex ◀── Retriever ◀── question
//!                                                      │
//!                                                      ▼
//!                                              context string
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod retriever;

pub use error::{Error, Result};
