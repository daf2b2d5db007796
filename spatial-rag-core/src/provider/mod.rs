//! Model provider abstraction layer.
//!
//! This module defines a common interface for the two external model
//! capabilities the engine consumes: text embeddings and streamed chat
//! completions.

mod types;
pub mod ollama;

// Re-export common types
pub use types::{
    ChatRequest,
    ChatResponse,
    ChatStream,
    EmbedRequest,
    EmbedResponse,
    Message,
    Provider,
    ProviderError,
    Result,
};

// Re-export provider implementations
pub use ollama::OllamaProvider;
