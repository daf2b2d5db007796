//! Hybrid spatial-semantic retrieval.
//!
//! This module ranks stored documents by a blend of textual relevance and
//! geographic proximity, then optionally answers the query over the ranked
//! list.
//!
//! # Architecture
//!
//! - [`RagEngine`]: orchestrates one request end to end
//! - [`embedder`]: role-prefixed text embeddings via a [`Provider`]
//! - [`spatial`]: radius and region constraints turned into store predicates
//! - [`scorer`]: `alpha * semantic + beta * spatial` and deterministic ordering
//! - [`store`]: candidate fetch (in-memory or Qdrant)
//! - [`synthesizer`]: complete or streamed answers, with a templated fallback
//!
//! # How It Works
//!
//! 1. **Validation**: query text, `top_k` and the spatial constraint are
//!    checked before any external call
//! 2. **Embedding**: the query is embedded with the query prefix
//! 3. **Candidate fetch**: the store returns the `top_k * candidate_multiplier`
//!    semantically closest documents that satisfy the spatial predicate
//! 4. **Ranking**: candidates are scored, sorted (hybrid desc, id asc),
//!    deduplicated and truncated to `top_k`
//! 5. **Synthesis** (optional): the ranked list becomes prompt context

pub mod embedder;
pub mod geometry;
mod memory_store;
mod qdrant_store;
pub mod scorer;
pub mod spatial;
pub mod store;
pub mod synthesizer;
mod types;

pub use embedder::{EmbedRole, Embedder, EmbedderError};
pub use geometry::{GeoPoint, Geometry, GeometryError, Polygon};
pub use memory_store::MemoryStore;
pub use qdrant_store::QdrantStore;
pub use scorer::HybridScorer;
pub use spatial::{RadiusConstraint, SpatialConstraint, SpatialFilter};
pub use store::CandidateStore;
pub use synthesizer::{AnswerEvent, AnswerSynthesizer, StreamOutcome};
pub use types::{
    Candidate, Document, NewDocument, QueryRequest, QueryResponse, ScoredDocument, Scores,
};

use crate::config::{Config, RetrievalConfig};
use crate::provider::{OllamaProvider, Provider};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use store::create_candidate_store;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Candidate store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),
}

impl RagError {
    /// Stable snake_case name, for transports that map errors to statuses.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::EmbeddingUnavailable(_) => "embedding_unavailable",
            RagError::InvalidRegion(_) => "invalid_region",
            RagError::InvalidRequest(_) => "invalid_request",
            RagError::StoreUnavailable(_) => "store_unavailable",
            RagError::GenerationFailed(_) => "generation_failed",
        }
    }

    /// Whether the caller, not a collaborator, is at fault.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, RagError::InvalidRegion(_) | RagError::InvalidRequest(_))
    }
}

impl From<EmbedderError> for RagError {
    fn from(e: EmbedderError) -> Self {
        RagError::EmbeddingUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Snapshot reported by the `health` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineHealth {
    pub status: String,
    pub embedding_model: String,
    pub alpha: f64,
    pub beta: f64,
    pub llm_available: bool,
    pub document_count: usize,
}

/// The retrieval orchestrator.
///
/// Holds no mutable state of its own beyond the embedder's cache; every
/// collaborator is injected, so one engine can be cloned across tasks and
/// requests run concurrently.
#[derive(Clone)]
pub struct RagEngine {
    embedder: Embedder,
    store: Arc<dyn CandidateStore>,
    scorer: HybridScorer,
    synthesizer: AnswerSynthesizer,
    config: RetrievalConfig,
}

impl RagEngine {
    /// Creates an engine that uses `provider` for embeddings and, when an
    /// `llm` section is configured, for generation.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use spatial_rag_core::{Config, rag::RagEngine, provider::OllamaProvider};
    /// # use std::sync::Arc;
    /// # async fn example() {
    /// let config = Config::default();
    /// let provider = Arc::new(OllamaProvider::new(&config.embedding.base_url));
    /// let engine = RagEngine::new(&config, provider).await.unwrap();
    /// # }
    /// ```
    pub async fn new(config: &Config, provider: Arc<dyn Provider>) -> Result<Self> {
        let synthesizer = match &config.llm {
            Some(llm) => AnswerSynthesizer::with_backend(provider.clone(), llm.clone()),
            None => AnswerSynthesizer::templated(),
        };
        let embedder = Embedder::new(provider, config.embedding.clone());
        let store = create_candidate_store(
            config.storage.clone(),
            config.embedding.dimension as u64,
        )
        .await
        .map_err(|e| RagError::StoreUnavailable(e.to_string()))?;

        Ok(Self::with_parts(
            embedder,
            store,
            synthesizer,
            config.retrieval.clone(),
        ))
    }

    /// Creates an engine talking to the Ollama endpoints named in `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedding_provider: Arc<dyn Provider> =
            Arc::new(OllamaProvider::new(&config.embedding.base_url));
        let mut engine = Self::new(config, embedding_provider).await?;
        if let Some(llm) = &config.llm {
            if llm.base_url != config.embedding.base_url {
                let generation_provider = Arc::new(OllamaProvider::new(&llm.base_url));
                engine.synthesizer = AnswerSynthesizer::with_backend(generation_provider, llm.clone());
            }
        }
        Ok(engine)
    }

    pub fn with_parts(
        embedder: Embedder,
        store: Arc<dyn CandidateStore>,
        synthesizer: AnswerSynthesizer,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            scorer: HybridScorer::from_config(&config),
            synthesizer,
            config,
        }
    }

    fn resolve_top_k(&self, top_k: Option<usize>) -> Result<usize> {
        match top_k {
            None => Ok(self.config.default_top_k.clamp(1, self.config.max_top_k.max(1))),
            Some(0) => Err(RagError::InvalidRequest(
                "top_k must be a positive integer".to_string(),
            )),
            Some(k) => Ok(k.min(self.config.max_top_k.max(1))),
        }
    }

    /// Turns the loose request fields into a spatial constraint.
    pub fn resolve_constraint(&self, request: &QueryRequest) -> Result<SpatialConstraint> {
        let radius = match (request.center, request.radius_m) {
            (Some(center), radius_m) => Some(RadiusConstraint {
                center,
                radius_m: radius_m.unwrap_or(self.config.default_radius_m),
            }),
            (None, Some(_)) if request.region.is_none() => {
                return Err(RagError::InvalidRequest(
                    "radius_m given without a center".to_string(),
                ))
            }
            (None, _) => None,
        };
        Ok(SpatialConstraint {
            radius,
            region: request.region.clone(),
        })
    }

    /// Ranks stored documents for `query` under `constraint`.
    ///
    /// Returns at most `top_k` documents (default and ceiling from the
    /// retrieval config), hybrid score descending with ties by id. An empty
    /// list is a valid result.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidRequest`] / [`RagError::InvalidRegion`] before any
    ///   external call
    /// - [`RagError::EmbeddingUnavailable`] if the query cannot be embedded
    /// - [`RagError::StoreUnavailable`] if the candidate fetch fails or times out
    pub async fn retrieve(
        &self,
        query: &str,
        constraint: &SpatialConstraint,
        top_k: Option<usize>,
    ) -> Result<Vec<ScoredDocument>> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidRequest("query must not be empty".to_string()));
        }
        let top_k = self.resolve_top_k(top_k)?;
        let filter = SpatialFilter::build(constraint)?;

        let embedding = self.embedder.embed(query, EmbedRole::Query).await?;
        debug!(dimension = embedding.len(), "Query embedded");

        let limit = top_k.saturating_mul(self.config.candidate_multiplier.max(1));
        let candidates = tokio::time::timeout(
            self.config.fetch_timeout(),
            self.store.fetch_candidates(&embedding, &filter, limit),
        )
        .await
        .map_err(|_| {
            RagError::StoreUnavailable(format!(
                "candidate fetch timed out after {} ms",
                self.config.fetch_timeout_ms
            ))
        })?
        .map_err(|e| RagError::StoreUnavailable(e.to_string()))?;
        debug!(candidates = candidates.len(), limit, "Candidates fetched");

        let ranked = self.scorer.rank(candidates, top_k);
        info!(
            results = ranked.len(),
            top_k,
            spatial = filter.is_spatial(),
            "Retrieval complete"
        );
        Ok(ranked)
    }

    /// Retrieves and, when asked for and anything was found, answers.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let constraint = self.resolve_constraint(request)?;
        let documents = self
            .retrieve(&request.query, &constraint, request.top_k)
            .await?;

        let answer = if request.include_answer && !documents.is_empty() {
            Some(self.synthesizer.synthesize(&request.query, &documents).await?)
        } else {
            None
        };

        Ok(QueryResponse {
            query: request.query.clone(),
            answer,
            total_count: documents.len(),
            documents,
        })
    }

    /// Retrieves, then streams an answer into `sender`.
    ///
    /// A retrieval failure is reported as a single `error` event.
    pub async fn query_stream(
        &self,
        request: &QueryRequest,
        sender: &mpsc::Sender<AnswerEvent>,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let retrieval = async {
            let constraint = self.resolve_constraint(request)?;
            self.retrieve(&request.query, &constraint, request.top_k).await
        };
        let retrieved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            retrieved = retrieval => retrieved,
        };

        match retrieved {
            Ok(documents) => {
                self.synthesizer
                    .stream(&request.query, documents, sender, cancel)
                    .await
            }
            Err(e) => {
                warn!("Retrieval failed before streaming: {}", e);
                let error = AnswerEvent::Error {
                    error: e.to_string(),
                };
                if synthesizer::emit(sender, cancel, error).await {
                    StreamOutcome::Failed
                } else {
                    StreamOutcome::Cancelled
                }
            }
        }
    }

    /// Embeds and stores documents, replacing any with the same id.
    ///
    /// Replaced documents keep their original `created_at`.
    pub async fn add_documents(&self, documents: Vec<NewDocument>) -> Result<usize> {
        for new in &documents {
            if new.id.trim().is_empty() {
                return Err(RagError::InvalidRequest("document id must not be empty".to_string()));
            }
            if let Some(geometry) = &new.geometry {
                geometry.validate().map_err(|e| {
                    RagError::InvalidRequest(format!("document {}: {}", new.id, e))
                })?;
            }
        }

        let mut prepared = Vec::with_capacity(documents.len());
        for new in documents {
            let embedding = self.embedder.embed(&new.content, EmbedRole::Document).await?;
            let existing = self
                .store
                .get(&new.id)
                .await
                .map_err(|e| RagError::StoreUnavailable(e.to_string()))?;

            let mut document = Document::new(new.id, new.title, new.content, embedding);
            document.geometry = new.geometry;
            document.metadata = new.metadata;
            if let Some(existing) = existing {
                document.created_at = existing.created_at;
                document.updated_at = Utc::now();
            }
            prepared.push(document);
        }

        let count = prepared.len();
        self.store
            .add(prepared)
            .await
            .map_err(|e| RagError::StoreUnavailable(e.to_string()))?;
        info!(count, "Documents added");
        Ok(count)
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.store
            .get(id)
            .await
            .map(|doc| doc.map(Document::without_embedding))
            .map_err(|e| RagError::StoreUnavailable(e.to_string()))
    }

    /// Stored documents, newest first.
    pub async fn list_documents(&self, limit: usize, offset: usize) -> Result<Vec<Document>> {
        self.store
            .list(limit, offset)
            .await
            .map_err(|e| RagError::StoreUnavailable(e.to_string()))
    }

    pub async fn count(&self) -> Result<usize> {
        self.store
            .count()
            .await
            .map_err(|e| RagError::StoreUnavailable(e.to_string()))
    }

    pub async fn clear(&self) -> Result<()> {
        self.store
            .clear()
            .await
            .map_err(|e| RagError::StoreUnavailable(e.to_string()))
    }

    pub async fn health(&self) -> Result<EngineHealth> {
        Ok(EngineHealth {
            status: "ok".to_string(),
            embedding_model: self.embedder.model().to_string(),
            alpha: self.config.alpha,
            beta: self.config.beta,
            llm_available: self.synthesizer.has_backend(),
            document_count: self.count().await?,
        })
    }
}
