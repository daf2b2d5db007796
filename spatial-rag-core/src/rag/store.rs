//! Candidate store abstraction and factory.
//!
//! A candidate store holds documents with their embeddings and geometries and
//! answers one question: which stored documents satisfy a spatial predicate,
//! ordered by cosine distance to a query embedding.

use super::memory_store::MemoryStore;
use super::qdrant_store::QdrantStore;
use super::spatial::SpatialFilter;
use super::types::{Candidate, Document};
use crate::config::{StorageConfig, StorageMode};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Unified interface over the candidate store backends.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Adds or replaces documents, keyed by id.
    async fn add(&self, documents: Vec<Document>) -> Result<()>;

    /// Returns up to `limit` documents satisfying `filter`, ordered by
    /// ascending cosine distance to `query_embedding` (ties by id).
    ///
    /// Candidates carry no embedding; they are a read-only projection.
    async fn fetch_candidates(
        &self,
        query_embedding: &[f32],
        filter: &SpatialFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Documents ordered newest first, then by id.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Document>>;

    /// Returns the total number of documents in the store.
    async fn count(&self) -> Result<usize>;

    /// Removes all documents from the store.
    async fn clear(&self) -> Result<()>;
}

/// Cosine distance `1 - cos(a, b)`, in `[0, 2]`.
///
/// Mismatched lengths or a zero vector yield the maximum distance.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 2.0)
}

/// Creates a candidate store for the configured storage mode.
///
/// - `Memory` keeps everything in process and searches exhaustively
/// - `Qdrant` talks to a remote server over gRPC
pub async fn create_candidate_store(
    storage_config: StorageConfig,
    vector_size: u64,
) -> Result<Arc<dyn CandidateStore>> {
    match storage_config.storage_mode {
        StorageMode::Memory => Ok(Arc::new(MemoryStore::new(vector_size as usize))),
        StorageMode::Qdrant { .. } => {
            let store = QdrantStore::new(storage_config, vector_size).await?;
            Ok(Arc::new(store))
        }
    }
}
