use crate::rag::{AnswerEvent, NewDocument, QueryRequest, RagError};
use serde::{Deserialize, Serialize};

fn default_limit() -> usize {
    100
}

/// One request per connection, sent as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Retrieve and answer in one reply.
    Query(QueryRequest),
    /// Retrieve, then stream answer events.
    Stream(QueryRequest),
    AddDocuments {
        documents: Vec<NewDocument>,
    },
    Documents {
        #[serde(default = "default_limit")]
        limit: usize,
        #[serde(default)]
        offset: usize,
    },
    Document {
        id: String,
    },
    Health,
}

/// A complete (non-streamed) reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Ok { result: serde_json::Value },
    Error { kind: String, error: String },
}

impl Reply {
    pub fn ok<T: Serialize>(result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(result) => Self::Ok { result },
            Err(e) => Self::Error {
                kind: "internal".to_string(),
                error: e.to_string(),
            },
        }
    }

    pub fn error(error: &RagError) -> Self {
        Self::Error {
            kind: error.kind().to_string(),
            error: error.to_string(),
        }
    }

    pub fn not_found(id: &str) -> Self {
        Self::Error {
            kind: "not_found".to_string(),
            error: format!("Document not found: {}", id),
        }
    }
}

/// One line written back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Event(AnswerEvent),
    Reply(Reply),
}
