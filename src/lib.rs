//! spatial-rag - Hybrid spatial-semantic retrieval
//!
//! This is the convenience wrapper crate that re-exports the engine.
//!
//! # Quick Start
//!
//! ```no_run
//! use spatial_rag::prelude::*;
//!
//! # async fn example() -> Result<(), RagError> {
//! let config = Config::default();
//! let engine = RagEngine::from_config(&config).await?;
//! let request = QueryRequest::new("zoning restrictions")
//!     .with_radius(GeoPoint::new(74.3587, 31.5204), 1_000.0);
//! let response = engine.query(&request).await?;
//! println!("{} documents", response.total_count);
//! # Ok(())
//! # }
//! ```

// Re-export core
pub use spatial_rag_core::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use spatial_rag_core::rag::{
        AnswerEvent, AnswerSynthesizer, CandidateStore, Document, EmbedRole, Embedder, GeoPoint,
        Geometry, MemoryStore, NewDocument, Polygon, QueryRequest, QueryResponse, RagEngine,
        RagError, ScoredDocument, SpatialConstraint, StreamOutcome,
    };
    pub use spatial_rag_core::{Config, OllamaProvider, Provider, Server};
}
