use super::geometry::{GeoPoint, Geometry, Polygon};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A document stored in the candidate store.
///
/// Documents carry their text, an optional geometry in WGS84, the embedding of
/// their content (computed with the document prefix) and free-form metadata.
///
/// # Example
///
/// ```no_run
/// # use spatial_rag_core::rag::{Document, Geometry};
/// let embedding = vec![0.1, 0.2, 0.3];
/// let doc = Document::new("permit-17", "Building permit", "Approved for C-2 use.", embedding)
///     .with_geometry(Geometry::point(74.3587, 31.5204))
///     .with_metadata("category", "permit");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            geometry: None,
            embedding,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Read-only projection returned from searches: everything but the vector.
    pub fn without_embedding(mut self) -> Self {
        self.embedding = Vec::new();
        self
    }
}

/// Input to ingestion: a document before it has been embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A store hit, before hybrid scoring.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub document: Document,
    /// Cosine distance between the query and document embeddings.
    pub semantic_distance: f64,
    /// Meters from the document's representative point to the constraint's
    /// reference point. `None` without a spatial constraint.
    pub spatial_distance_m: Option<f64>,
}

/// The three scores attached to a ranked document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub semantic: f64,
    pub spatial: Option<f64>,
    pub hybrid: f64,
}

/// A ranked document with its scores.
///
/// Only lives for the duration of one retrieval; never written back to the
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub document: Document,
    pub scores: Scores,
    pub spatial_distance_m: Option<f64>,
}

fn default_include_answer() -> bool {
    true
}

/// A retrieval request as it arrives from a transport.
///
/// `center` alone means a radius query with the configured default radius;
/// `region` wins over `center` when both are given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub center: Option<GeoPoint>,
    #[serde(default)]
    pub radius_m: Option<f64>,
    #[serde(default)]
    pub region: Option<Geometry>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default = "default_include_answer")]
    pub include_answer: bool,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            center: None,
            radius_m: None,
            region: None,
            top_k: None,
            include_answer: true,
        }
    }

    pub fn with_radius(mut self, center: GeoPoint, radius_m: f64) -> Self {
        self.center = Some(center);
        self.radius_m = Some(radius_m);
        self
    }

    pub fn with_center(mut self, center: GeoPoint) -> Self {
        self.center = Some(center);
        self
    }

    pub fn with_region(mut self, region: Polygon) -> Self {
        self.region = Some(Geometry::Polygon(region));
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn without_answer(mut self) -> Self {
        self.include_answer = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub answer: Option<String>,
    pub documents: Vec<ScoredDocument>,
    pub total_count: usize,
}
