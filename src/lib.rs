//! # Compliance RAG
//!
//! A local-first retrieval core for question answering over regulatory and
//! compliance documents (GMP guidance, 21 CFR, SOPs, batch-record forms).
//!
//! Documents are read from a folder tree where each immediate subfolder is a
//! category, split into overlapping chunks, embedded with a local sentence
//! model, and stored in a persistent SQLite collection. At query time the
//! question is embedded and the nearest chunks are returned with a rendered,
//! source-attributed context block for an answer generator.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Extractors  │──▶│   Pipeline   │──▶│ SqliteIndex  │
//! │  PDF/DOCX   │   │ Chunk+Embed  │   │ BLOB vectors │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                                      ┌──────▼──────┐
//!                                      │  Retriever  │──▶ context
//!                                      └─────────────┘
//! ```
//!
//! The chunker, retriever, embedder trait and in-memory index live in
//! [`compliance_rag_core`]; this crate supplies the I/O-bound pieces.
//!
//! ## Quick Start
//!
//! ```bash
//! crag init                                 # create the collection
//! crag ingest ./data/raw                    # extract, chunk, embed, store
//! crag search "cleaning validation limits"  # ranked chunks
//! crag context "What does Part 11 require?" # context block for an LLM
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`embedding`] | Embedder construction, fastembed local model |
//! | [`sqlite_index`] | Persistent vector index |
//! | [`ingest`] | Ingestion pipeline and `crag ingest` |
//! | [`search`] | `crag search` / `crag context` |
//! | [`stats`] | Collection stats and maintenance |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod sqlite_index;
pub mod stats;
