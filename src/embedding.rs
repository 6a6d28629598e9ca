//! Embedder construction and the fastembed-backed local model.
//!
//! | `embedding.provider` | Embedder |
//! |----------------------|----------|
//! | `"local"` | [`LocalEmbedder`] (fastembed, feature `local-embeddings-fastembed`) |
//! | `"hash"` | [`HashingEmbedder`] (model-free, deterministic) |
//!
//! Models are downloaded from Hugging Face on first use and cached; after
//! that, embedding runs entirely offline.

use std::sync::Arc;

use compliance_rag_core::embedding::{Embedder, HashingEmbedder};
use compliance_rag_core::{Error, Result};

use crate::config::EmbeddingConfig;

/// Dimensionality used by the hashing embedder when none is configured.
pub const DEFAULT_HASH_DIMS: usize = 384;

/// Native output dimensionality of the supported local models.
pub fn local_model_dims(model: &str) -> Option<usize> {
    match model {
        "all-minilm-l6-v2" | "bge-small-en-v1.5" | "multilingual-e5-small" => Some(384),
        "all-minilm-l12-v2" => Some(384),
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => Some(768),
        "multilingual-e5-base" => Some(768),
        "bge-large-en-v1.5" | "multilingual-e5-large" => Some(1024),
        _ => None,
    }
}

/// Model identifier the configured embedder reports, without loading it.
pub fn configured_model_name(config: &EmbeddingConfig) -> String {
    match config.provider.as_str() {
        "hash" => format!("hash-{}", config.dims.unwrap_or(DEFAULT_HASH_DIMS)),
        _ => config.model.clone(),
    }
}

/// Build the embedder selected by `config.provider`.
///
/// Loading a local model may download weights, so it runs on a blocking
/// thread. A model that cannot be loaded is reported as
/// [`Error::ModelUnavailable`].
pub async fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => {
            let dims = config.dims.unwrap_or(DEFAULT_HASH_DIMS);
            Ok(Arc::new(HashingEmbedder::new(dims)?))
        }
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::load(config).await?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(Error::ModelUnavailable(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(Error::invalid_argument(format!(
            "unknown embedding provider: '{}' (expected local or hash)",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use compliance_rag_core::embedding::{check_output, Embedder};
    use compliance_rag_core::{Error, Result};
    use tracing::{debug, info};

    use super::local_model_dims;
    use crate::config::EmbeddingConfig;

    fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l12-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML12V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
            other => Err(Error::ModelUnavailable(format!(
                "unknown local embedding model '{}'",
                other
            ))),
        }
    }

    /// Sentence-embedding model run in-process through fastembed (ONNX Runtime).
    ///
    /// The model is loaded once and shared; inference runs on a blocking
    /// worker thread and returns only complete batches.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<fastembed::TextEmbedding>>,
    }

    impl LocalEmbedder {
        pub async fn load(config: &EmbeddingConfig) -> Result<Self> {
            let model_id = fastembed_model(&config.model)?;
            let dims = config
                .dims
                .or_else(|| local_model_dims(&config.model))
                .ok_or_else(|| {
                    Error::ModelUnavailable(format!("unknown dims for model '{}'", config.model))
                })?;

            info!(model = %config.model, dims, "loading local embedding model");
            let model = tokio::task::spawn_blocking(move || {
                fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model_id).with_show_download_progress(false),
                )
            })
            .await
            .map_err(|e| Error::ModelUnavailable(e.to_string()))?
            .map_err(|e| Error::ModelUnavailable(e.to_string()))?;

            Ok(Self {
                model_name: config.model.clone(),
                dims,
                batch_size: config.batch_size,
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let inputs = texts.to_vec();
            let count = inputs.len();
            let batch_size = self.batch_size;
            let model = Arc::clone(&self.model);

            let vectors = tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| Error::Embedding("embedding model lock poisoned".to_string()))?;
                model
                    .embed(inputs, Some(batch_size))
                    .map_err(|e| Error::Embedding(e.to_string()))
            })
            .await
            .map_err(|e| Error::Embedding(format!("embedding worker failed: {}", e)))??;

            check_output(&vectors, count, self.dims)?;
            debug!(count, "embedded batch");
            Ok(vectors)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, dims: Option<usize>) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            dims,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn hash_provider_uses_configured_dims() {
        let embedder = create_embedder(&config("hash", Some(64))).await.unwrap();
        assert_eq!(embedder.dims(), 64);
        assert_eq!(embedder.model_name(), "hash-64");
        assert_eq!(configured_model_name(&config("hash", Some(64))), "hash-64");
        let v = embedder.embed_query("process validation").await.unwrap();
        assert_eq!(v.len(), 64);
    }

    #[tokio::test]
    async fn hash_provider_defaults_to_minilm_width() {
        let embedder = create_embedder(&config("hash", None)).await.unwrap();
        assert_eq!(embedder.dims(), DEFAULT_HASH_DIMS);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let err = create_embedder(&config("openai", None)).await.err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn minilm_is_384() {
        assert_eq!(local_model_dims("all-minilm-l6-v2"), Some(384));
        assert_eq!(local_model_dims("unknown"), None);
    }
}
