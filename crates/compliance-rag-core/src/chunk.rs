//! Overlapping, boundary-aware text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of at most `chunk_size`
//! characters where each chunk begins exactly `chunk_overlap` characters
//! before the end of the previous one.
//!
//! # Algorithm
//!
//! 1. Blank text produces no chunks; text of at most `chunk_size` characters
//!    produces exactly one.
//! 2. Otherwise slide a window of `chunk_size` characters. Inside the part of
//!    the window past the overlap region, cut after the last occurrence of the
//!    most preferred separator: paragraph (`\n\n`), line (`\n`), sentence
//!    (`. `), then space. With none present, cut the raw characters at
//!    `chunk_size`.
//! 3. The next window starts `chunk_overlap` characters before that cut.
//! 4. The remainder, once it fits in one window, becomes the final chunk.
//!
//! Sizes are counted in Unicode scalar values and every slice falls on a
//! char boundary. Windows that land inside a long whitespace run are kept
//! as they are, so the chunks always tile the whole text.
//!
//! # Example
//!
//! ```rust
//! use compliance_rag_core::chunk::Chunker;
//! use compliance_rag_core::models::Metadata;
//!
//! let chunker = Chunker::new(1000, 200).unwrap();
//! let meta = Metadata::new("guidance/a.pdf", "a.pdf", "guidance");
//! let chunks = chunker.chunk("Hello world.\n\nSecond paragraph.", &meta);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use crate::error::{Error, Result};
use crate::models::{Chunk, Metadata};

/// Split points in order of preference.
pub const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Chunking configuration, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    /// # Errors
    ///
    /// `InvalidArgument` if `chunk_size` is zero or `chunk_overlap` is not
    /// strictly smaller than `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::invalid_argument("chunk_size must be > 0"));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::invalid_argument(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into ordered chunks, each carrying a copy of `metadata`
    /// plus its own `chunk_index` and `start_index`.
    pub fn chunk(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Byte offset of every char, plus the end of the string.
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = offsets.len() - 1;

        let mut spans = Vec::new();
        let mut start = 0usize;
        loop {
            if total_chars - start <= self.chunk_size {
                spans.push((start, total_chars));
                break;
            }
            let end = self.window_end(text, &offsets, start);
            spans.push((start, end));
            start = end - self.chunk_overlap;
        }

        spans
            .into_iter()
            .map(|(s, e)| (s, &text[offsets[s]..offsets[e]]))
            .enumerate()
            .map(|(ordinal, (start_offset, piece))| {
                let mut meta = metadata.clone();
                meta.insert("chunk_index", ordinal);
                meta.insert("start_index", start_offset);
                Chunk {
                    ordinal,
                    start_offset,
                    text: piece.to_string(),
                    metadata: meta,
                }
            })
            .collect()
    }

    /// Char index where the window starting at `start` should end.
    ///
    /// Always returns a value in `(start + chunk_overlap, start + chunk_size]`
    /// so the following window makes progress.
    fn window_end(&self, text: &str, offsets: &[usize], start: usize) -> usize {
        let hard_end = start + self.chunk_size;
        let floor = start + self.chunk_overlap;
        let window = &text[offsets[floor]..offsets[hard_end]];

        for sep in SEPARATORS {
            if let Some(pos) = window.rfind(sep) {
                let byte_end = offsets[floor] + pos + sep.len();
                let end = offsets.binary_search(&byte_end).unwrap_or_else(|i| i);
                if end > floor {
                    return end;
                }
            }
        }
        hard_end
    }
}
