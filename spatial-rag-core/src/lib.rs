//! spatial-rag-core - Hybrid spatial-semantic retrieval engine
//!
//! Provides the components for answering questions over geolocated documents:
//! - Model provider abstraction (Ollama embeddings and streamed chat)
//! - Spatial filtering, hybrid scoring and retrieval orchestration
//! - Answer synthesis, streamed or complete, with a templated fallback
//! - Configuration management
//! - Unix socket server
//!
//! ## Primary API
//!
//! [`RagEngine`] runs retrieval and synthesis in process; [`Server`] exposes
//! it over a socket.

// Public modules
pub mod config;
pub mod provider;
pub mod rag;
pub mod server;

#[cfg(test)]
pub(crate) mod test_utils;

// Public exports
pub use config::{Config, ConfigError};
pub use rag::{
    AnswerEvent, Document, GeoPoint, Geometry, NewDocument, Polygon, QueryRequest,
    QueryResponse, RagEngine, RagError, ScoredDocument, SpatialConstraint,
};
pub use server::Server;

// Provider exports
pub use provider::{ChatRequest, ChatResponse, Message, OllamaProvider, Provider, ProviderError};
