//! Unix socket server exposing the engine.
//!
//! The server is organized into separate concerns:
//! - `types`: Protocol types for requests and replies
//! - `handler`: Routing requests to the engine
//! - `transport`: Unix socket communication layer
//!
//! Each connection carries one JSON request line and receives JSON lines back:
//! a single reply, or the answer events of a stream. A client that closes the
//! connection mid-stream cancels generation.

mod handler;
mod transport;
mod types;

pub use transport::{Client, TransportError};
pub use types::{Frame, Reply, Request};

use crate::config::Config;
use crate::rag::{RagEngine, RagError};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Frames buffered per connection before the handler waits on the writer.
const FRAME_BUFFER: usize = 64;

/// Main server coordinating transport and request handling.
pub struct Server {
    handler: Arc<handler::RequestHandler>,
    transport: transport::UnixSocketTransport,
}

impl Server {
    /// Creates a server with an engine built from `config`.
    pub async fn new(config: Config) -> Result<Self, RagError> {
        let engine = RagEngine::from_config(&config).await?;
        Ok(Self::with_engine(engine, config.server.socket_path))
    }

    pub fn with_engine(engine: RagEngine, socket_path: impl Into<String>) -> Self {
        Self {
            handler: Arc::new(handler::RequestHandler::new(engine)),
            transport: transport::UnixSocketTransport::new(socket_path),
        }
    }

    /// Starts the server and listens until Ctrl-C.
    pub async fn start(&self) -> Result<(), TransportError> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                trigger.cancel();
            }
        });
        self.serve_until(shutdown).await
    }

    /// Accepts connections until `shutdown` fires. In-flight streams are
    /// cancelled on shutdown.
    pub async fn serve_until(&self, shutdown: CancellationToken) -> Result<(), TransportError> {
        let listener = self.transport.bind().await?;
        info!(socket = %self.transport.socket_path(), "Server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = Arc::clone(&self.handler);
                        let cancel = shutdown.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler, cancel).await {
                                error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Accept failed: {}", e),
                },
                _ = shutdown.cancelled() => {
                    info!("Shutting down");
                    self.transport.cleanup();
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Handles a single client connection.
async fn handle_connection(
    stream: tokio::net::UnixStream,
    handler: Arc<handler::RequestHandler>,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let request = match transport::read_request(&mut reader).await {
        Ok(request) => request,
        Err(e) if e.is_malformed_request() => {
            warn!("Rejecting malformed request: {}", e);
            let rejection = RagError::InvalidRequest(format!("malformed request: {}", e));
            return transport::write_frame(&mut writer, &Frame::Reply(Reply::error(&rejection)))
                .await;
        }
        Err(e) => return Err(e),
    };
    debug!(?request, "Request received");

    let (sender, receiver) = mpsc::channel(FRAME_BUFFER);

    let watch = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            transport::wait_for_disconnect(&mut reader).await;
            cancel.cancel();
        })
    };

    let handle_task = tokio::spawn(async move {
        handler.handle(request, sender, cancel).await;
    });

    let write_task = tokio::spawn(async move { transport::write_frames(&mut writer, receiver).await });

    let (handled, written) = tokio::join!(handle_task, write_task);
    watch.abort();
    if let Err(e) = handled {
        error!("Request handler panicked: {}", e);
    }
    match written {
        Ok(result) => result,
        Err(e) => {
            error!("Writer task failed: {}", e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, LlmConfig, RetrievalConfig};
    use crate::rag::{
        AnswerEvent, AnswerSynthesizer, Embedder, GeoPoint, Geometry, MemoryStore, NewDocument,
        QueryRequest,
    };
    use crate::test_utils::FakeProvider;
    use std::time::Duration;

    async fn start_server(provider: FakeProvider) -> (String, CancellationToken, tempfile::TempDir) {
        let provider = Arc::new(provider);
        let engine = RagEngine::with_parts(
            Embedder::new(
                provider.clone(),
                EmbeddingConfig {
                    dimension: 3,
                    ..EmbeddingConfig::default()
                },
            ),
            Arc::new(MemoryStore::new(3)),
            AnswerSynthesizer::with_backend(provider, LlmConfig::default()),
            RetrievalConfig::default(),
        );

        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("spatial-rag.sock").to_string_lossy().to_string();
        let server = Server::with_engine(engine, socket_path.clone());
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move { server.serve_until(token).await });

        for _ in 0..50 {
            if std::path::Path::new(&socket_path).exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        (socket_path, shutdown, dir)
    }

    async fn call(client: &Client, request: Request) -> Vec<Frame> {
        let mut frames = Vec::new();
        client.call(&request, |frame| frames.push(frame)).await.unwrap();
        frames
    }

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let (socket_path, shutdown, _dir) =
            start_server(FakeProvider::new(3).with_fragments(&["Park ", "nearby."])).await;
        let client = Client::new(socket_path);

        let frames = call(
            &client,
            Request::AddDocuments {
                documents: vec![NewDocument {
                    id: "park".to_string(),
                    title: "City park".to_string(),
                    content: "A green park.".to_string(),
                    geometry: Some(Geometry::point(74.3587, 31.5204)),
                    metadata: Default::default(),
                }],
            },
        )
        .await;
        assert!(matches!(&frames[..], [Frame::Reply(Reply::Ok { .. })]));

        let frames = call(&client, Request::Health).await;
        match &frames[..] {
            [Frame::Reply(Reply::Ok { result })] => {
                assert_eq!(result["document_count"], 1);
                assert_eq!(result["llm_available"], true);
            }
            other => panic!("unexpected {:?}", other),
        }

        let query = QueryRequest::new("parks").with_radius(GeoPoint::new(74.3587, 31.5204), 500.0);
        let frames = call(&client, Request::Stream(query)).await;
        let events: Vec<AnswerEvent> = frames
            .into_iter()
            .map(|f| match f {
                Frame::Event(event) => event,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert!(matches!(events[0], AnswerEvent::Metadata { doc_count: 1, .. }));
        assert_eq!(events[1], AnswerEvent::Chunk { chunk: "Park ".to_string() });
        assert_eq!(events.last(), Some(&AnswerEvent::Done));

        let frames = call(&client, Request::Document { id: "missing".to_string() }).await;
        assert!(matches!(&frames[..], [Frame::Reply(Reply::Error { kind, .. })] if kind == "not_found"));

        let frames = call(&client, Request::Query(QueryRequest::new(" "))).await;
        assert!(matches!(&frames[..], [Frame::Reply(Reply::Error { kind, .. })] if kind == "invalid_request"));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_reply() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

        let (socket_path, shutdown, _dir) = start_server(FakeProvider::new(3)).await;
        let stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{\"type\":\"query\",\"query\":\n").await.unwrap();
        writer.flush().await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        let mut frames = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            frames.push(serde_json::from_str::<Frame>(&line).unwrap());
        }
        drop(writer);

        match &frames[..] {
            [Frame::Reply(Reply::Error { kind, error })] => {
                assert_eq!(kind, "invalid_request");
                assert!(error.contains("malformed request"));
            }
            other => panic!("unexpected {:?}", other),
        }
        shutdown.cancel();
    }
}
