//! Qdrant candidate store.
//!
//! Each document becomes one point. The full document is kept as a JSON string
//! in the payload, next to a `location` geo field holding the representative
//! point of its geometry. Spatial predicates are pushed down to Qdrant as geo
//! conditions on `location` and then re-checked exactly in process, so region
//! queries see lines and polygons whose representative point lies inside the
//! region. A line or polygon that crosses the region with its representative
//! point outside is not returned by this backend.

use super::geometry::{GeoPoint, Polygon};
use super::spatial::SpatialFilter;
use super::store::CandidateStore;
use super::types::{Candidate, Document};
use crate::config::{StorageConfig, StorageMode};
use anyhow::{Context, Result};
use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        self, vectors_config::Config, Condition, CreateCollectionBuilder,
        CreateFieldIndexCollectionBuilder, Distance, FieldType, Filter, GeoLineString,
        GeoPolygon, GeoRadius, GetPointsBuilder, PointId, PointStruct, ScrollPointsBuilder,
        SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder, VectorsConfig,
    },
    Payload, Qdrant,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const LOCATION_FIELD: &str = "location";
const DOCUMENT_FIELD: &str = "document";

/// Candidate store backed by a remote Qdrant collection.
///
/// Re-adding a document with an existing id replaces it through Qdrant's
/// upsert, since point ids are derived from document ids.
#[derive(Clone)]
pub struct QdrantStore {
    client: Arc<Qdrant>,
    collection_name: String,
    vector_size: u64,
}

/// Stable numeric point id for a document id.
fn point_id(id: &str) -> u64 {
    let digest = Sha256::digest(id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn qdrant_point(point: GeoPoint) -> qdrant::GeoPoint {
    qdrant::GeoPoint {
        lon: point.lon,
        lat: point.lat,
    }
}

fn line_string(ring: &[GeoPoint]) -> GeoLineString {
    GeoLineString {
        points: ring.iter().copied().map(qdrant_point).collect(),
    }
}

fn geo_polygon(polygon: &Polygon) -> GeoPolygon {
    GeoPolygon {
        exterior: Some(line_string(polygon.exterior())),
        interiors: polygon.interiors().iter().map(|r| line_string(r)).collect(),
    }
}

/// Qdrant condition approximating the predicate on the `location` field.
fn location_filter(filter: &SpatialFilter) -> Option<Filter> {
    let condition = match filter {
        SpatialFilter::Any => return None,
        SpatialFilter::Radius { center, radius_m } => Condition::geo_radius(
            LOCATION_FIELD,
            GeoRadius {
                center: Some(qdrant_point(*center)),
                radius: *radius_m as f32,
            },
        ),
        SpatialFilter::Region { polygon, .. } => {
            Condition::geo_polygon(LOCATION_FIELD, geo_polygon(polygon))
        }
    };
    Some(Filter::must([condition]))
}

fn document_payload(document: &Document) -> Result<Payload> {
    let mut value = json!({
        "id": document.id,
        DOCUMENT_FIELD: serde_json::to_string(&document.clone().without_embedding())?,
        "created_at": document.created_at.to_rfc3339(),
    });
    if let Some(geometry) = &document.geometry {
        let point = geometry.representative_point();
        value[LOCATION_FIELD] = json!({ "lon": point.lon, "lat": point.lat });
    }
    Payload::try_from(value).context("Failed to build point payload")
}

fn document_from_payload(payload: &HashMap<String, qdrant::Value>) -> Result<Document> {
    let raw = payload
        .get(DOCUMENT_FIELD)
        .and_then(|v| v.as_str())
        .context("Point payload has no document")?;
    serde_json::from_str(raw).context("Failed to decode stored document")
}

#[async_trait]
impl CandidateStore for QdrantStore {
    async fn add(&self, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let points = documents
            .iter()
            .map(|document| {
                Ok(PointStruct::new(
                    point_id(&document.id),
                    document.embedding.clone(),
                    document_payload(document)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points).wait(true))
            .await
            .context("Failed to upsert points")?;

        Ok(())
    }

    async fn fetch_candidates(
        &self,
        query_embedding: &[f32],
        filter: &SpatialFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let mut search = SearchPointsBuilder::new(
            &self.collection_name,
            query_embedding.to_vec(),
            limit as u64,
        )
        .with_payload(true);
        if let Some(location) = location_filter(filter) {
            search = search.filter(location);
        }

        let response = self
            .client
            .search_points(search)
            .await
            .context("Failed to search points")?;
        debug!(hits = response.result.len(), "Qdrant search returned");

        let mut candidates = Vec::with_capacity(response.result.len());
        for point in response.result {
            let document = document_from_payload(&point.payload)?;
            if !filter.matches(document.geometry.as_ref()) {
                continue;
            }
            candidates.push(Candidate {
                semantic_distance: (1.0 - point.score as f64).clamp(0.0, 2.0),
                spatial_distance_m: filter.distance_m(document.geometry.as_ref()),
                document,
            });
        }
        candidates.sort_by(|a, b| {
            a.semantic_distance
                .total_cmp(&b.semantic_distance)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        Ok(candidates)
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection_name, vec![PointId::from(point_id(id))])
                    .with_payload(true),
            )
            .await
            .context("Failed to get point")?;

        response
            .result
            .first()
            .map(|point| document_from_payload(&point.payload))
            .transpose()
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        let mut page: Option<PointId> = None;

        // Scroll through all points in batches
        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection_name)
                .limit(100)
                .with_payload(true);
            if let Some(off) = page {
                builder = builder.offset(off);
            }

            let scroll_result = self
                .client
                .scroll(builder)
                .await
                .context("Failed to scroll points")?;

            for point in &scroll_result.result {
                documents.push(document_from_payload(&point.payload)?);
            }

            match scroll_result.next_page_offset {
                Some(next) => page = Some(next),
                None => break,
            }
        }

        documents.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(documents.into_iter().skip(offset).take(limit).collect())
    }

    /// Returns the total number of documents in the collection.
    async fn count(&self) -> Result<usize> {
        let info = self
            .client
            .collection_info(&self.collection_name)
            .await
            .context("Failed to get collection info")?;

        Ok(info
            .result
            .map(|r| r.points_count.unwrap_or(0) as usize)
            .unwrap_or(0))
    }

    /// Removes all documents from the collection.
    async fn clear(&self) -> Result<()> {
        self.client
            .delete_collection(&self.collection_name)
            .await
            .context("Failed to delete collection")?;

        self.ensure_collection().await
    }
}

impl QdrantStore {
    /// Connects to the configured server and ensures the collection and its
    /// geo index exist.
    pub async fn new(storage_config: StorageConfig, vector_size: u64) -> Result<Self> {
        let client = match &storage_config.storage_mode {
            StorageMode::Qdrant { url } => Arc::new(
                Qdrant::from_url(url)
                    .build()
                    .context("Failed to connect to Qdrant server")?,
            ),
            StorageMode::Memory => anyhow::bail!("QdrantStore requires qdrant storage mode"),
        };

        let store = Self {
            client,
            collection_name: storage_config.collection_name,
            vector_size,
        };
        store.ensure_collection().await?;

        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection_name)
            .await
            .context("Failed to check collection")?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection_name).vectors_config(
                        VectorsConfig {
                            config: Some(Config::Params(
                                VectorParamsBuilder::new(self.vector_size, Distance::Cosine)
                                    .build(),
                            )),
                        },
                    ),
                )
                .await
                .context("Failed to create collection")?;

            self.client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(
                        &self.collection_name,
                        LOCATION_FIELD,
                        FieldType::Geo,
                    )
                    .wait(true),
                )
                .await
                .context("Failed to create geo index")?;
        }

        Ok(())
    }
}
