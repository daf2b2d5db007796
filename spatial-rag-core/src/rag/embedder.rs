//! Embedding generation with role-specific prefixes.
//!
//! The embedding model is asymmetric: a query and a stored document must be
//! prefixed differently before embedding, or similarity quality degrades
//! silently. [`EmbedRole`] makes the caller pick one explicitly.

use crate::config::EmbeddingConfig;
use crate::provider::{Provider, ProviderError};
use moka::future::Cache;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during embedding generation.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// The provider API returned an error.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Embedding call timed out after {0} ms")]
    Timeout(u64),

    /// The API response contained no embeddings.
    #[error("No embeddings returned")]
    NoEmbeddings,

    /// Cosine distance is undefined for the zero vector.
    #[error("Embedding is the zero vector")]
    ZeroVector,

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Failure of a load another caller was already running for the same key.
    #[error("{0}")]
    Shared(Arc<EmbedderError>),
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedderError>;

/// Which side of the retrieval the text is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedRole {
    Query,
    Document,
}

/// Generates vector embeddings through a [`Provider`].
///
/// Embeddings are cached per `(role, text)` when `cache_capacity` is non-zero.
/// Concurrent misses on one key share a single provider call. The cache
/// belongs to this embedder, so it never outlives the model and prefix
/// settings it was filled under.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn Provider>,
    config: EmbeddingConfig,
    cache: Option<Cache<(EmbedRole, String), Vec<f32>>>,
}

impl Embedder {
    pub fn new(provider: Arc<dyn Provider>, config: EmbeddingConfig) -> Self {
        let cache = (config.cache_capacity > 0).then(|| Cache::new(config.cache_capacity));
        Self {
            provider,
            config,
            cache,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// The exact text sent to the model for `text` in `role`.
    pub fn prefixed(&self, text: &str, role: EmbedRole) -> String {
        let prefix = match role {
            EmbedRole::Query => &self.config.query_prefix,
            EmbedRole::Document => &self.config.document_prefix,
        };
        format!("{}{}", prefix, text)
    }

    /// Generates a vector embedding for `text` as a query or a document.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The provider is unreachable or rejects the request
    /// - The call exceeds `timeout_ms`
    /// - The returned vector is empty, all zeros or of the wrong dimension
    pub async fn embed(&self, text: &str, role: EmbedRole) -> Result<Vec<f32>> {
        let Some(cache) = &self.cache else {
            return self.fetch(text, role).await;
        };
        // Failed loads are not cached.
        cache
            .try_get_with((role, text.to_string()), self.fetch(text, role))
            .await
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(EmbedderError::Shared))
    }

    async fn fetch(&self, text: &str, role: EmbedRole) -> Result<Vec<f32>> {
        let input = self.prefixed(text, role);
        let embedding = tokio::time::timeout(
            self.config.timeout(),
            self.provider.embed(&input, &self.config.model),
        )
        .await
        .map_err(|_| EmbedderError::Timeout(self.config.timeout_ms))??;

        self.check(&embedding)?;
        debug!(?role, dimension = embedding.len(), "Embedding generated");
        Ok(embedding)
    }

    fn check(&self, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(EmbedderError::NoEmbeddings);
        }
        if self.config.dimension > 0 && embedding.len() != self.config.dimension {
            return Err(EmbedderError::DimensionMismatch {
                expected: self.config.dimension,
                actual: embedding.len(),
            });
        }
        if embedding.iter().all(|v| *v == 0.0) {
            return Err(EmbedderError::ZeroVector);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeProvider;
    use std::time::Duration;

    fn config(dimension: usize, cache_capacity: u64) -> EmbeddingConfig {
        EmbeddingConfig {
            dimension,
            cache_capacity,
            query_prefix: "q: ".to_string(),
            document_prefix: "d: ".to_string(),
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_role_prefix_reaches_provider() {
        let provider = Arc::new(FakeProvider::new(3));
        let embedder = Embedder::new(provider.clone(), config(3, 0));

        embedder.embed("parks", EmbedRole::Query).await.unwrap();
        embedder.embed("parks", EmbedRole::Document).await.unwrap();

        assert_eq!(provider.embedded_texts(), vec!["q: parks", "d: parks"]);
    }

    #[tokio::test]
    async fn test_roles_produce_different_inputs() {
        let provider = Arc::new(FakeProvider::new(3));
        let embedder = Embedder::new(provider, config(3, 0));
        assert_ne!(
            embedder.prefixed("x", EmbedRole::Query),
            embedder.prefixed("x", EmbedRole::Document)
        );
    }

    #[tokio::test]
    async fn test_cache_is_keyed_by_role() {
        let provider = Arc::new(FakeProvider::new(3));
        let embedder = Embedder::new(provider.clone(), config(3, 16));

        let first = embedder.embed("parks", EmbedRole::Query).await.unwrap();
        let second = embedder.embed("parks", EmbedRole::Query).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.embed_calls(), 1);

        embedder.embed("parks", EmbedRole::Document).await.unwrap();
        assert_eq!(provider.embed_calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_call() {
        let provider = Arc::new(FakeProvider::new(3).with_delay(Duration::from_millis(50)));
        let embedder = Embedder::new(provider.clone(), config(3, 16));

        let (a, b, c) = tokio::join!(
            embedder.embed("parks", EmbedRole::Query),
            embedder.embed("parks", EmbedRole::Query),
            embedder.embed("parks", EmbedRole::Query),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
        assert_eq!(provider.embed_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let provider = Arc::new(FakeProvider::new(3).failing_embeddings());
        let embedder = Embedder::new(provider.clone(), config(3, 16));

        let first = embedder.embed("parks", EmbedRole::Query).await;
        assert!(matches!(first, Err(EmbedderError::Provider(_))));
        assert!(embedder.embed("parks", EmbedRole::Query).await.is_err());
        assert_eq!(provider.embed_calls(), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let provider = Arc::new(FakeProvider::new(4));
        let embedder = Embedder::new(provider, config(3, 0));
        let result = embedder.embed("parks", EmbedRole::Query).await;
        assert!(matches!(
            result,
            Err(EmbedderError::DimensionMismatch { expected: 3, actual: 4 })
        ));
    }

    #[tokio::test]
    async fn test_zero_vector_rejected() {
        let provider = Arc::new(FakeProvider::new(3).with_embedding("void", vec![0.0, 0.0, 0.0]));
        let embedder = Embedder::new(provider, config(3, 0));
        let result = embedder.embed("void", EmbedRole::Query).await;
        assert!(matches!(result, Err(EmbedderError::ZeroVector)));
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces() {
        let provider = Arc::new(FakeProvider::new(3).failing_embeddings());
        let embedder = Embedder::new(provider, config(3, 0));
        let result = embedder.embed("parks", EmbedRole::Query).await;
        assert!(matches!(result, Err(EmbedderError::Provider(_))));
    }

    #[tokio::test]
    async fn test_timeout() {
        let provider = Arc::new(FakeProvider::new(3).with_delay(Duration::from_millis(200)));
        let mut config = config(3, 0);
        config.timeout_ms = 10;
        let embedder = Embedder::new(provider, config);
        let result = embedder.embed("parks", EmbedRole::Query).await;
        assert!(matches!(result, Err(EmbedderError::Timeout(10))));
    }
}
