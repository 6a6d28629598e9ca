//! Core data models that flow through ingestion and retrieval.
//!
//! Documents and chunks only live during ingestion; once embedded they are
//! persisted as index records and come back from queries as
//! [`SearchResult`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metadata keys every indexed chunk carries.
pub const RECOGNIZED_KEYS: [&str; 3] = ["source", "filename", "category"];

/// Stable opaque identifier of an index record, rendered as `doc_<n>`.
///
/// Ids are assigned monotonically per collection and never reused until the
/// collection is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc_{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.strip_prefix("doc_")
            .and_then(|n| n.parse::<u64>().ok())
            .map(RecordId)
            .ok_or_else(|| Error::invalid_argument(format!("malformed record id: '{}'", s)))
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for RecordId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Str(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Str(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<usize> for MetadataValue {
    fn from(i: usize) -> Self {
        MetadataValue::Int(i as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        MetadataValue::Float(x)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Per-chunk metadata: the recognized keys plus free-form extension fields.
///
/// Serializes as one flat JSON object, e.g.
/// `{"source": "...", "filename": "a.pdf", "category": "guidance", "page_count": 12}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub source: String,
    pub filename: String,
    pub category: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, MetadataValue>,
}

impl Metadata {
    pub fn new(
        source: impl Into<String>,
        filename: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            filename: filename.into(),
            category: category.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Builder form of [`Metadata::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set an extension field. Recognized keys update the typed field instead.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            "source" => self.source = value.to_string(),
            "filename" => self.filename = value.to_string(),
            "category" => self.category = value.to_string(),
            _ => {
                self.extra.insert(key, value);
            }
        }
    }

    /// Look up any key, recognized or extension.
    pub fn get(&self, key: &str) -> Option<MetadataValue> {
        match key {
            "source" => Some(MetadataValue::Str(self.source.clone())),
            "filename" => Some(MetadataValue::Str(self.filename.clone())),
            "category" => Some(MetadataValue::Str(self.category.clone())),
            _ => self.extra.get(key).cloned(),
        }
    }

    /// Reject metadata that would be ambiguous at query time.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("source", &self.source),
            ("filename", &self.filename),
            ("category", &self.category),
        ] {
            if value.trim().is_empty() {
                return Err(Error::invalid_argument(format!(
                    "metadata key '{}' must not be empty",
                    key
                )));
            }
        }
        if let Some(key) = self
            .extra
            .keys()
            .find(|k| RECOGNIZED_KEYS.contains(&k.as_str()) || k.is_empty())
        {
            return Err(Error::invalid_argument(format!(
                "extension metadata key '{}' is reserved or empty",
                key
            )));
        }
        Ok(())
    }

    /// Exact-match conjunction over every key in `filter`.
    pub fn matches(&self, filter: &MetadataFilter) -> bool {
        filter
            .iter()
            .all(|(key, expected)| self.get(key).as_ref() == Some(expected))
    }
}

/// Exact-match metadata constraints, all of which must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter(BTreeMap<String, MetadataValue>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the `category` key only.
    pub fn category(category: impl Into<String>) -> Self {
        Self::new().eq("category", category.into())
    }

    /// Add an equality constraint.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }
}

/// A bounded span of one document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position of this chunk within its document, starting at 0.
    pub ordinal: usize,
    /// Offset of the first character within the source text, in chars.
    pub start_offset: usize,
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    /// Length in Unicode scalar values, the unit chunk sizes are measured in.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Pair the chunk with its embedding for insertion into an index.
    pub fn into_record(self, embedding: Vec<f32>) -> NewRecord {
        NewRecord {
            text: self.text,
            metadata: self.metadata,
            embedding,
        }
    }
}

/// A record waiting to be added to a vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub text: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// One ranked hit from a vector index query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: RecordId,
    pub text: String,
    pub metadata: Metadata,
    /// Distance under the collection's metric; lower is closer.
    pub distance: f64,
    /// Monotonic transform of `distance` into `[0, 1]`; higher is closer.
    pub relevance_score: f64,
}

/// Ranked results for one retriever query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub num_results: usize,
    pub results: Vec<SearchResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_display_roundtrip() {
        let id = RecordId(42);
        assert_eq!(id.to_string(), "doc_42");
        assert_eq!("doc_42".parse::<RecordId>().unwrap(), id);
        assert!("chunk_42".parse::<RecordId>().is_err());
        assert!("doc_".parse::<RecordId>().is_err());
    }

    #[test]
    fn metadata_serializes_flat() {
        let meta = Metadata::new("/data/guidance/a.pdf", "a.pdf", "guidance")
            .with("page_count", 12i64)
            .with("file_size_kb", 3.5);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["category"], "guidance");
        assert_eq!(json["page_count"], 12);
        assert_eq!(json["file_size_kb"], 3.5);

        let back: Metadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn insert_recognized_key_updates_typed_field() {
        let mut meta = Metadata::new("s", "f", "old");
        meta.insert("category", "new");
        assert_eq!(meta.category, "new");
        assert!(meta.extra.is_empty());
    }

    #[test]
    fn validate_rejects_empty_recognized_keys() {
        let meta = Metadata::new("s", "", "c");
        assert!(matches!(meta.validate(), Err(Error::InvalidArgument(_))));
        assert!(Metadata::new("s", "f", "c").validate().is_ok());
    }

    #[test]
    fn validate_rejects_shadowing_extension_key() {
        let mut meta = Metadata::new("s", "f", "c");
        meta.extra.insert("category".into(), "x".into());
        assert!(meta.validate().is_err());
    }

    #[test]
    fn filter_is_exact_conjunction() {
        let meta = Metadata::new("s", "a.pdf", "guidance").with("page_count", 3i64);
        assert!(meta.matches(&MetadataFilter::new()));
        assert!(meta.matches(&MetadataFilter::category("guidance")));
        assert!(!meta.matches(&MetadataFilter::category("Guidance")));
        assert!(!meta.matches(&MetadataFilter::category("guid")));
        assert!(meta.matches(
            &MetadataFilter::category("guidance").eq("page_count", 3i64)
        ));
        assert!(!meta.matches(
            &MetadataFilter::category("guidance").eq("page_count", 4i64)
        ));
        assert!(!meta.matches(&MetadataFilter::new().eq("author", "x")));
    }
}
