//! Scripted provider for unit tests.

use crate::provider::{ChatRequest, ChatResponse, ChatStream, Provider, ProviderError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A [`Provider`] whose embeddings and chat fragments are fixed up front.
///
/// Embedding lookups match the first registered key that the (prefixed) input
/// ends with; anything else gets a deterministic non-zero vector derived from
/// the text.
pub struct FakeProvider {
    dimension: usize,
    embeddings: Vec<(String, Vec<f32>)>,
    fragments: Vec<String>,
    fail_embed: bool,
    fail_chat_start: bool,
    fail_chat_after: Option<usize>,
    delay: Option<Duration>,
    embed_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    embedded: Mutex<Vec<String>>,
    last_chat: Mutex<Option<ChatRequest>>,
}

impl FakeProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            embeddings: Vec::new(),
            fragments: vec!["Hello".to_string(), " world".to_string()],
            fail_embed: false,
            fail_chat_start: false,
            fail_chat_after: None,
            delay: None,
            embed_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            embedded: Mutex::new(Vec::new()),
            last_chat: Mutex::new(None),
        }
    }

    pub fn with_embedding(mut self, suffix: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.embeddings.push((suffix.into(), embedding));
        self
    }

    pub fn with_fragments(mut self, fragments: &[&str]) -> Self {
        self.fragments = fragments.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_embeddings(mut self) -> Self {
        self.fail_embed = true;
        self
    }

    pub fn failing_chat_start(mut self) -> Self {
        self.fail_chat_start = true;
        self
    }

    /// Yield `n` fragments, then an error.
    pub fn failing_chat_after(mut self, n: usize) -> Self {
        self.fail_chat_after = Some(n);
        self
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn embedded_texts(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }

    pub fn last_chat_request(&self) -> Option<ChatRequest> {
        self.last_chat.lock().unwrap().clone()
    }

    fn derived_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![1.0; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            embedding[i % self.dimension] += (byte % 7) as f32;
        }
        embedding
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatStream> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_chat.lock().unwrap() = Some(request.clone());
        if self.fail_chat_start {
            return Err(ProviderError::Api("generation backend down".to_string()));
        }

        let mut items: Vec<Result<ChatResponse>> = self
            .fragments
            .iter()
            .map(|content| {
                Ok(ChatResponse {
                    model: request.model.clone(),
                    content: content.clone(),
                    done: false,
                })
            })
            .collect();
        match self.fail_chat_after {
            Some(n) => {
                items.truncate(n);
                items.push(Err(ProviderError::Api("generation interrupted".to_string())));
            }
            None => items.push(Ok(ChatResponse {
                model: request.model.clone(),
                content: String::new(),
                done: true,
            })),
        }

        let delay = self.delay;
        Ok(stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }

    async fn embed(&self, text: &str, _model: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.embedded.lock().unwrap().push(text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_embed {
            return Err(ProviderError::Api("embedding backend down".to_string()));
        }
        let embedding = self
            .embeddings
            .iter()
            .find(|(suffix, _)| text.ends_with(suffix.as_str()))
            .map(|(_, embedding)| embedding.clone())
            .unwrap_or_else(|| self.derived_embedding(text));
        Ok(embedding)
    }
}
