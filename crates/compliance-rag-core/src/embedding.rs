//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] trait every embedding backend implements, the
//! model-free [`HashingEmbedder`], and pure helpers for vector
//! serialization and similarity.
//!
//! The neural backend (fastembed) lives in the `compliance-rag` app crate.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Maps text to fixed-dimension vectors.
///
/// Output is order-preserving with exactly one vector per input, and
/// identical input under the same model yields identical vectors. A call
/// either returns every vector or an error; there are no partial results.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in index stats (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder produces.
    fn dims(&self) -> usize;

    /// Embed a batch of texts. Empty strings are allowed.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        match vectors.pop() {
            Some(v) if vectors.is_empty() => Ok(v),
            _ => Err(Error::Embedding(
                "embedder returned the wrong number of vectors for one query".to_string(),
            )),
        }
    }
}

/// Check that a backend returned one vector of length `dims` per input.
pub fn check_output(vectors: &[Vec<f32>], inputs: usize, dims: usize) -> Result<()> {
    if vectors.len() != inputs {
        return Err(Error::Embedding(format!(
            "expected {} vectors, got {}",
            inputs,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(Error::DimensionMismatch {
            expected: dims,
            found: bad.len(),
        });
    }
    Ok(())
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed with SHA-256 into one of
/// `dims` buckets with a hash-derived sign, and the result is
/// L2-normalized. Texts sharing vocabulary land close together under cosine
/// distance. Needs no model download, so it backs tests and offline runs.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
    model_name: String,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(Error::invalid_argument("hashing embedder dims must be > 0"));
        }
        Ok(Self {
            dims,
            model_name: format!("hash-{}", dims),
        })
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use compliance_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a zero
/// vector on either side.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Euclidean (L2) distance. Caller guarantees equal lengths.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_euclidean() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hashing_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let texts = vec![
            "Cleaning validation for API manufacturing".to_string(),
            "cleaning VALIDATION for api manufacturing".to_string(),
        ];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        // Tokens are lowercased before hashing.
        assert_eq!(a[0], a[1]);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_batch_independent() {
        let embedder = HashingEmbedder::new(32).unwrap();
        let all = embedder
            .embed(&["alpha beta".to_string(), "gamma".to_string()])
            .await
            .unwrap();
        let single = embedder.embed_query("gamma").await.unwrap();
        assert_eq!(all[1], single);
    }

    #[tokio::test]
    async fn test_hashing_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16).unwrap();
        let v = embedder.embed_query("").await.unwrap();
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_hashing_shared_vocabulary_is_closer() {
        let embedder = HashingEmbedder::new(256).unwrap();
        let q = embedder.embed_one("process validation lifecycle");
        let near = embedder.embed_one("guidance on process validation lifecycle stages");
        let far = embedder.embed_one("electronic signatures audit trail");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn test_check_output() {
        assert!(check_output(&[vec![0.0; 4]], 1, 4).is_ok());
        assert!(matches!(
            check_output(&[vec![0.0; 3]], 1, 4),
            Err(Error::DimensionMismatch { expected: 4, found: 3 })
        ));
        assert!(matches!(
            check_output(&[], 1, 4),
            Err(Error::Embedding(_))
        ));
    }

    #[test]
    fn test_zero_dims_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }
}
