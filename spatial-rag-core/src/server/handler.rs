use super::types::{Frame, Reply, Request};
use crate::rag::{AnswerEvent, QueryRequest, RagEngine, StreamOutcome};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type FrameSender = mpsc::Sender<Frame>;

/// Answer events buffered between the synthesizer and the socket writer.
const EVENT_BUFFER: usize = 32;

/// Routes requests to the engine and sends replies via channel.
pub struct RequestHandler {
    engine: RagEngine,
}

impl RequestHandler {
    pub fn new(engine: RagEngine) -> Self {
        Self { engine }
    }

    pub async fn handle(&self, request: Request, sender: FrameSender, cancel: CancellationToken) {
        match request {
            Request::Query(query) => self.handle_query(query, sender).await,
            Request::Stream(query) => self.handle_stream(query, sender, cancel).await,
            Request::AddDocuments { documents } => {
                let reply = match self.engine.add_documents(documents).await {
                    Ok(count) => Reply::ok(&serde_json::json!({ "added": count })),
                    Err(e) => Reply::error(&e),
                };
                let _ = sender.send(Frame::Reply(reply)).await;
            }
            Request::Documents { limit, offset } => {
                let reply = match self.engine.list_documents(limit, offset).await {
                    Ok(documents) => Reply::ok(&documents),
                    Err(e) => Reply::error(&e),
                };
                let _ = sender.send(Frame::Reply(reply)).await;
            }
            Request::Document { id } => {
                let reply = match self.engine.get_document(&id).await {
                    Ok(Some(document)) => Reply::ok(&document),
                    Ok(None) => Reply::not_found(&id),
                    Err(e) => Reply::error(&e),
                };
                let _ = sender.send(Frame::Reply(reply)).await;
            }
            Request::Health => {
                let reply = match self.engine.health().await {
                    Ok(health) => Reply::ok(&health),
                    Err(e) => Reply::error(&e),
                };
                let _ = sender.send(Frame::Reply(reply)).await;
            }
        }
    }

    async fn handle_query(&self, query: QueryRequest, sender: FrameSender) {
        let reply = match self.engine.query(&query).await {
            Ok(response) => Reply::ok(&response),
            Err(e) => {
                if !e.is_caller_error() {
                    warn!("Query failed: {}", e);
                }
                Reply::error(&e)
            }
        };
        let _ = sender.send(Frame::Reply(reply)).await;
    }

    async fn handle_stream(&self, query: QueryRequest, sender: FrameSender, cancel: CancellationToken) {
        let (events, mut receiver) = mpsc::channel::<AnswerEvent>(EVENT_BUFFER);

        let produce = async {
            let outcome = self.engine.query_stream(&query, &events, &cancel).await;
            drop(events);
            outcome
        };
        let forward = async {
            while let Some(event) = receiver.recv().await {
                if sender.send(Frame::Event(event)).await.is_err() {
                    cancel.cancel();
                    break;
                }
            }
            // Unblocks the producer if it is waiting on a full buffer.
            receiver.close();
        };

        let (outcome, ()) = tokio::join!(produce, forward);
        match outcome {
            StreamOutcome::Cancelled => debug!("Stream cancelled by client"),
            other => debug!(?other, "Stream finished"),
        }
    }
}
