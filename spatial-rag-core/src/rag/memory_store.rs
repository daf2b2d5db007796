//! In-process candidate store with exhaustive search.

use super::spatial::SpatialFilter;
use super::store::{cosine_distance, CandidateStore};
use super::types::{Candidate, Document};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Documents held in a `HashMap` behind an async `RwLock`.
///
/// Every fetch scans the whole collection, so the spatial predicate is always
/// exact. Suited to tests and small corpora.
#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Arc<RwLock<HashMap<String, Document>>>,
    vector_size: usize,
}

impl MemoryStore {
    /// A `vector_size` of zero accepts embeddings of any length.
    pub fn new(vector_size: usize) -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            vector_size,
        }
    }

    fn check_dimension(&self, embedding: &[f32], id: &str) -> Result<()> {
        if self.vector_size > 0 && embedding.len() != self.vector_size {
            bail!(
                "document {} has a {}-dimensional embedding, store expects {}",
                id,
                embedding.len(),
                self.vector_size
            );
        }
        Ok(())
    }
}

#[async_trait]
impl CandidateStore for MemoryStore {
    async fn add(&self, documents: Vec<Document>) -> Result<()> {
        for document in &documents {
            self.check_dimension(&document.embedding, &document.id)?;
        }
        let mut stored = self.documents.write().await;
        for document in documents {
            stored.insert(document.id.clone(), document);
        }
        Ok(())
    }

    async fn fetch_candidates(
        &self,
        query_embedding: &[f32],
        filter: &SpatialFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        self.check_dimension(query_embedding, "query")?;
        let stored = self.documents.read().await;

        let mut candidates: Vec<Candidate> = stored
            .values()
            .filter(|doc| filter.matches(doc.geometry.as_ref()))
            .map(|doc| Candidate {
                semantic_distance: cosine_distance(query_embedding, &doc.embedding),
                spatial_distance_m: filter.distance_m(doc.geometry.as_ref()),
                document: doc.clone().without_embedding(),
            })
            .collect();
        drop(stored);

        candidates.sort_by(|a, b| {
            a.semantic_distance
                .total_cmp(&b.semantic_distance)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Document>> {
        let stored = self.documents.read().await;
        let mut documents: Vec<&Document> = stored.values().collect();
        documents.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(documents
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|doc| doc.clone().without_embedding())
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.documents.read().await.len())
    }

    async fn clear(&self) -> Result<()> {
        self.documents.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::geometry::{GeoPoint, Geometry, Polygon};
    use crate::rag::spatial::SpatialConstraint;
    use chrono::{Duration, Utc};

    fn doc(id: &str, embedding: Vec<f32>, lon: f64, lat: f64) -> Document {
        Document::new(id, id, format!("content of {}", id), embedding)
            .with_geometry(Geometry::point(lon, lat))
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new(2);
        store
            .add(vec![
                doc("near-similar", vec![1.0, 0.0], 74.3587, 31.5204),
                doc("near-different", vec![0.0, 1.0], 74.3590, 31.5210),
                doc("far-similar", vec![1.0, 0.1], 74.60, 31.80),
                Document::new("nowhere", "nowhere", "no geometry", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_unfiltered_fetch_orders_by_distance() {
        let store = seeded().await;
        let candidates = store
            .fetch_candidates(&[1.0, 0.0], &SpatialFilter::Any, 10)
            .await
            .unwrap();

        let ids: Vec<&str> = candidates.iter().map(|c| c.document.id.as_str()).collect();
        assert_eq!(ids, vec!["near-similar", "nowhere", "far-similar", "near-different"]);
        assert!(candidates.iter().all(|c| c.spatial_distance_m.is_none()));
        assert!(candidates.iter().all(|c| c.document.embedding.is_empty()));
    }

    #[tokio::test]
    async fn test_radius_filter_is_exact() {
        let store = seeded().await;
        let filter = SpatialFilter::build(&SpatialConstraint::radius(
            GeoPoint::new(74.3587, 31.5204),
            1_000.0,
        ))
        .unwrap();
        let candidates = store.fetch_candidates(&[1.0, 0.0], &filter, 10).await.unwrap();

        let ids: Vec<&str> = candidates.iter().map(|c| c.document.id.as_str()).collect();
        assert_eq!(ids, vec!["near-similar", "near-different"]);
        assert!(candidates[0].spatial_distance_m.unwrap() < 1e-6);
    }

    #[tokio::test]
    async fn test_region_filter() {
        let store = seeded().await;
        let region = Polygon::new(vec![
            GeoPoint::new(74.5, 31.7),
            GeoPoint::new(74.7, 31.7),
            GeoPoint::new(74.7, 31.9),
            GeoPoint::new(74.5, 31.9),
            GeoPoint::new(74.5, 31.7),
        ]);
        let filter = SpatialFilter::build(&SpatialConstraint::region(region)).unwrap();
        let candidates = store.fetch_candidates(&[1.0, 0.0], &filter, 10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].document.id, "far-similar");
        assert!(candidates[0].spatial_distance_m.unwrap() < 1.0);
    }

    #[tokio::test]
    async fn test_limit_and_empty_store() {
        let store = seeded().await;
        let candidates = store
            .fetch_candidates(&[1.0, 0.0], &SpatialFilter::Any, 1)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        let candidates = store
            .fetch_candidates(&[1.0, 0.0], &SpatialFilter::Any, 10)
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = MemoryStore::new(3);
        assert!(store.add(vec![doc("a", vec![1.0], 0.0, 0.0)]).await.is_err());
        assert!(store
            .fetch_candidates(&[1.0], &SpatialFilter::Any, 1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_add_replaces_by_id() {
        let store = seeded().await;
        store
            .add(vec![doc("nowhere", vec![0.0, 1.0], 1.0, 1.0)])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 4);
        let replaced = store.get("nowhere").await.unwrap().unwrap();
        assert!(replaced.geometry.is_some());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryStore::new(2);
        let now = Utc::now();
        let mut old = doc("old", vec![1.0, 0.0], 0.0, 0.0);
        old.created_at = now - Duration::hours(1);
        let mut new = doc("new", vec![1.0, 0.0], 0.0, 0.0);
        new.created_at = now;
        store.add(vec![old, new]).await.unwrap();

        let listed = store.list(10, 0).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(store.list(10, 1).await.unwrap()[0].id, "old");
        assert!(store.list(10, 5).await.unwrap().is_empty());
    }
}
