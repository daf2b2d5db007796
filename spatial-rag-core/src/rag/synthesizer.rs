//! Answer synthesis over a ranked document list.
//!
//! Two paths share one prompt: [`AnswerSynthesizer::synthesize`] returns a
//! complete answer, [`AnswerSynthesizer::stream`] pushes [`AnswerEvent`]s into
//! a channel as fragments arrive. Without a generation backend both paths fall
//! back to a deterministic templated summary.
//!
//! A stream always opens with one `metadata` event and, unless cancelled,
//! closes with exactly one `done` or `error`.

use super::types::ScoredDocument;
use super::RagError;
use crate::config::LlmConfig;
use crate::provider::{ChatRequest, Message, Provider};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const NO_DOCUMENTS_ANSWER: &str = "No relevant documents found for your query.";

/// Documents listed in the templated answer.
const TEMPLATE_LIMIT: usize = 5;

/// One event of an answer stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum AnswerEvent {
    Metadata {
        doc_count: usize,
        documents: Vec<ScoredDocument>,
    },
    Chunk {
        chunk: String,
    },
    Done,
    Error {
        error: String,
    },
}

impl AnswerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Metadata { .. } => "metadata",
            Self::Chunk { .. } => "chunk",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    /// Renders the event as a Server-Sent Events frame.
    pub fn to_sse(&self) -> String {
        let data = match self {
            Self::Metadata {
                doc_count,
                documents,
            } => json!({ "doc_count": doc_count, "documents": documents }),
            Self::Chunk { chunk } => json!({ "chunk": chunk }),
            Self::Done => json!({ "status": "complete" }),
            Self::Error { error } => json!({ "error": error }),
        };
        format!("event: {}\ndata: {}\n\n", self.kind(), data)
    }
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed,
    /// The consumer went away; no terminal event was sent.
    Cancelled,
}

#[derive(Clone)]
struct Backend {
    provider: Arc<dyn Provider>,
    config: LlmConfig,
}

#[derive(Clone, Default)]
pub struct AnswerSynthesizer {
    backend: Option<Backend>,
}

impl AnswerSynthesizer {
    /// A synthesizer that only ever produces templated answers.
    pub fn templated() -> Self {
        Self { backend: None }
    }

    pub fn with_backend(provider: Arc<dyn Provider>, config: LlmConfig) -> Self {
        Self {
            backend: Some(Backend { provider, config }),
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Produces one complete answer.
    ///
    /// # Errors
    ///
    /// [`RagError::GenerationFailed`] when a configured backend fails. The
    /// template is never substituted for a failed backend.
    pub async fn synthesize(
        &self,
        query: &str,
        documents: &[ScoredDocument],
    ) -> Result<String, RagError> {
        if documents.is_empty() {
            return Ok(NO_DOCUMENTS_ANSWER.to_string());
        }
        let Some(backend) = &self.backend else {
            return Ok(templated_answer(query, documents));
        };

        let mut fragments = backend
            .provider
            .chat(chat_request(&backend.config, query, documents))
            .await
            .map_err(|e| RagError::GenerationFailed(e.to_string()))?;

        let mut answer = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment.map_err(|e| RagError::GenerationFailed(e.to_string()))?;
            answer.push_str(&fragment.content);
            if fragment.done {
                break;
            }
        }
        Ok(answer)
    }

    /// Streams an answer into `sender`.
    ///
    /// Stops without a terminal event as soon as `cancel` fires or the
    /// receiving side is dropped; the backend stream is dropped with it.
    pub async fn stream(
        &self,
        query: &str,
        documents: Vec<ScoredDocument>,
        sender: &mpsc::Sender<AnswerEvent>,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let metadata = AnswerEvent::Metadata {
            doc_count: documents.len(),
            documents: documents.clone(),
        };
        if !emit(sender, cancel, metadata).await {
            return StreamOutcome::Cancelled;
        }

        if documents.is_empty() {
            return finish(sender, cancel, AnswerEvent::Done).await;
        }

        let Some(backend) = &self.backend else {
            let answer = templated_answer(query, &documents);
            for word in answer.split_whitespace() {
                let chunk = AnswerEvent::Chunk {
                    chunk: format!("{} ", word),
                };
                if !emit(sender, cancel, chunk).await {
                    return StreamOutcome::Cancelled;
                }
            }
            return finish(sender, cancel, AnswerEvent::Done).await;
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            opened = backend.provider.chat(chat_request(&backend.config, query, &documents)) => opened,
        };
        let mut fragments = match opened {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!("Generation backend failed to start: {}", e);
                let error = AnswerEvent::Error {
                    error: RagError::GenerationFailed(e.to_string()).to_string(),
                };
                return finish(sender, cancel, error).await;
            }
        };

        let mut chunks = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamOutcome::Cancelled,
                _ = sender.closed() => return StreamOutcome::Cancelled,
                next = fragments.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    if !fragment.content.is_empty() {
                        chunks += 1;
                        let chunk = AnswerEvent::Chunk {
                            chunk: fragment.content,
                        };
                        if !emit(sender, cancel, chunk).await {
                            return StreamOutcome::Cancelled;
                        }
                    }
                    if fragment.done {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(chunks, "Generation failed mid-stream: {}", e);
                    let error = AnswerEvent::Error {
                        error: RagError::GenerationFailed(e.to_string()).to_string(),
                    };
                    return finish(sender, cancel, error).await;
                }
                None => break,
            }
        }

        debug!(chunks, "Answer stream complete");
        finish(sender, cancel, AnswerEvent::Done).await
    }
}

/// Sends an event unless cancellation wins first.
pub(super) async fn emit(
    sender: &mpsc::Sender<AnswerEvent>,
    cancel: &CancellationToken,
    event: AnswerEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = sender.send(event) => sent.is_ok(),
    }
}

async fn finish(
    sender: &mpsc::Sender<AnswerEvent>,
    cancel: &CancellationToken,
    terminal: AnswerEvent,
) -> StreamOutcome {
    let outcome = match terminal {
        AnswerEvent::Error { .. } => StreamOutcome::Failed,
        _ => StreamOutcome::Completed,
    };
    if emit(sender, cancel, terminal).await {
        outcome
    } else {
        StreamOutcome::Cancelled
    }
}

fn chat_request(config: &LlmConfig, query: &str, documents: &[ScoredDocument]) -> ChatRequest {
    ChatRequest::new(
        config.model.clone(),
        build_messages(&config.system_prompt, query, documents),
    )
    .with_temperature(config.temperature)
}

/// Numbered context blocks, one per document.
pub fn context_text(documents: &[ScoredDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let location = doc
                .document
                .geometry
                .as_ref()
                .map(|g| g.to_wkt())
                .unwrap_or_else(|| "unknown".to_string());
            let mut block = format!(
                "[Document {}]\nTitle: {}\nLocation: {}\nContent: {}\nRelevance: semantic={:.3}",
                i + 1,
                doc.document.title,
                location,
                doc.document.content,
                doc.scores.semantic
            );
            if let Some(spatial) = doc.scores.spatial {
                block.push_str(&format!(", spatial={:.3}", spatial));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_messages(system_prompt: &str, query: &str, documents: &[ScoredDocument]) -> Vec<Message> {
    let listing: Vec<serde_json::Value> = documents
        .iter()
        .map(|doc| {
            json!({
                "id": doc.document.id,
                "title": doc.document.title,
                "geometry": doc.document.geometry,
            })
        })
        .collect();

    let user = format!(
        "Question: {}\n\nRetrieved Documents Context:\n{}\n\nDocument Metadata (JSON):\n{:#}\n\n\
Please answer the question based on the above spatial context.",
        query,
        context_text(documents),
        serde_json::Value::Array(listing)
    );

    vec![Message::system(system_prompt), Message::user(user)]
}

/// Deterministic summary used when no generation backend is configured.
pub fn templated_answer(query: &str, documents: &[ScoredDocument]) -> String {
    if documents.is_empty() {
        return NO_DOCUMENTS_ANSWER.to_string();
    }

    let lines: Vec<String> = documents
        .iter()
        .take(TEMPLATE_LIMIT)
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "{}. **{}** (relevance: {:.2})",
                i + 1,
                doc.document.title,
                doc.scores.hybrid
            )
        })
        .collect();

    format!(
        "Based on your query \"{}\", I found {} relevant spatial documents:\n\n{}\n\n\
*Note: This is a templated response. Configure a generation backend for synthesized answers.*",
        query,
        documents.len(),
        lines.join("\n")
    )
}
