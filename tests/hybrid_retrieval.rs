use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use spatial_rag::config::{EmbeddingConfig, LlmConfig, RetrievalConfig};
use spatial_rag::prelude::*;
use spatial_rag::provider::{ChatRequest, ChatResponse, ChatStream, Result as ProviderResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Embeds text as keyword counts over (park, zoning, flood) and answers by
/// echoing the titles it was given.
struct KeywordProvider;

#[async_trait]
impl Provider for KeywordProvider {
    async fn chat(&self, request: ChatRequest) -> ProviderResult<ChatStream> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let titles: Vec<ProviderResult<ChatResponse>> = prompt
            .lines()
            .filter_map(|line| line.strip_prefix("Title: "))
            .map(|title| {
                Ok(ChatResponse {
                    model: request.model.clone(),
                    content: format!("{}; ", title),
                    done: false,
                })
            })
            .collect();
        Ok(stream::iter(titles).boxed())
    }

    async fn embed(&self, text: &str, _model: &str) -> ProviderResult<Vec<f32>> {
        let text = text.to_lowercase();
        Ok(["park", "zoning", "flood"]
            .iter()
            .map(|word| text.matches(word).count() as f32 + 0.01)
            .collect())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn document(id: &str, title: &str, content: &str, lon: f64, lat: f64) -> NewDocument {
    NewDocument {
        id: id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        geometry: Some(Geometry::point(lon, lat)),
        metadata: Default::default(),
    }
}

async fn engine() -> anyhow::Result<RagEngine> {
    init_tracing();
    let provider: Arc<dyn Provider> = Arc::new(KeywordProvider);
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

    let (lon, lat) = (74.3587, 31.5204);
    engine
        .add_documents(vec![
            document("a", "Block zoning", "Zoning restrictions apply to this block.", lon, lat + 0.0009),
            document("b", "Downtown zoning", "Zoning, zoning and more zoning restrictions.", lon, lat + 0.018),
            document("c", "Corner park", "A small park with a playground.", lon + 0.0005, lat),
            document("d", "River flood plain", "Flood risk area.", lon - 0.3, lat - 0.3),
        ])
        .await?;
    Ok(engine)
}

#[tokio::test]
async fn radius_query_keeps_only_documents_inside_the_radius() -> anyhow::Result<()> {
    let engine = engine().await?;
    let request = QueryRequest::new("zoning restrictions")
        .with_radius(GeoPoint::new(74.3587, 31.5204), 1_000.0)
        .without_answer();

    let response = engine.query(&request).await?;
    let ids: Vec<&str> = response.documents.iter().map(|d| d.document.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert!(response
        .documents
        .iter()
        .all(|d| d.spatial_distance_m.map_or(false, |m| m <= 1_000.0)));
    assert!(response.answer.is_none());
    Ok(())
}

#[tokio::test]
async fn semantic_only_query_ranks_by_similarity() -> anyhow::Result<()> {
    let engine = engine().await?;
    let results = engine
        .retrieve("flood", &SpatialConstraint::none(), Some(1))
        .await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.id, "d");
    assert!(results[0].scores.spatial.is_none());
    Ok(())
}

#[tokio::test]
async fn streamed_answer_follows_ranking() -> anyhow::Result<()> {
    let engine = engine().await?;
    let request = QueryRequest::new("zoning restrictions")
        .with_radius(GeoPoint::new(74.3587, 31.5204), 1_000.0);

    let (tx, mut rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let outcome = engine.query_stream(&request, &tx, &cancel).await;
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert_eq!(outcome, StreamOutcome::Completed);
    assert!(matches!(events.first(), Some(AnswerEvent::Metadata { doc_count: 2, .. })));
    assert_eq!(
        events[1..3].to_vec(),
        vec![
            AnswerEvent::Chunk { chunk: "Block zoning; ".to_string() },
            AnswerEvent::Chunk { chunk: "Corner park; ".to_string() },
        ]
    );
    assert_eq!(events.last(), Some(&AnswerEvent::Done));
    assert!(events[0].to_sse().starts_with("event: metadata\ndata: {"));
    Ok(())
}
