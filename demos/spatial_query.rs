//! Example: a radius query over a few geolocated documents.
//!
//! This example shows how to:
//! - Build an engine from `config.yaml` (or defaults)
//! - Ingest documents with point geometries
//! - Run a radius-constrained query and print the hybrid scores
//!
//! Needs an Ollama instance serving the configured embedding model.

use spatial_rag::config::StorageMode;
use spatial_rag::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("spatial-rag - Radius Query Example");
    println!("==================================\n");

    let config = Config::load_or_default("config.yaml")?;
    print_config(&config);

    let engine = RagEngine::from_config(&config).await?;
    if engine.count().await? == 0 {
        ingest_sample(&engine).await?;
    }

    let request = QueryRequest::new("zoning restrictions")
        .with_radius(GeoPoint::new(74.3587, 31.5204), 1_000.0)
        .with_top_k(5);
    println!("Query: '{}' within 1 km of (74.3587, 31.5204)\n", request.query);

    let response = engine.query(&request).await?;
    for (i, doc) in response.documents.iter().enumerate() {
        println!(
            "  {}. {} (hybrid {:.3}, semantic {:.3}, {:.0} m)",
            i + 1,
            doc.document.title,
            doc.scores.hybrid,
            doc.scores.semantic,
            doc.spatial_distance_m.unwrap_or_default()
        );
    }
    if let Some(answer) = response.answer {
        println!("\nAnswer:\n{}", answer);
    }
    Ok(())
}

fn print_config(config: &Config) {
    println!("Configuration:");
    match &config.storage.storage_mode {
        StorageMode::Memory => println!("  Storage: in-process memory"),
        StorageMode::Qdrant { url } => println!("  Storage: Qdrant @ {}", url),
    }
    println!("  Embedding: {}", config.embedding.model);
    println!(
        "  Weights: alpha {} / beta {}",
        config.retrieval.alpha, config.retrieval.beta
    );
    println!();
}

async fn ingest_sample(engine: &RagEngine) -> anyhow::Result<()> {
    let documents = [
        ("block-zoning", "Block zoning", "Commercial zoning restrictions apply to this block.", 74.3587, 31.5213),
        ("corner-park", "Corner park", "A small public park with a playground.", 74.3592, 31.5204),
        ("downtown-zoning", "Downtown zoning", "Height limits and zoning rules downtown.", 74.3587, 31.5384),
    ]
    .into_iter()
    .map(|(id, title, content, lon, lat)| NewDocument {
        id: id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        geometry: Some(Geometry::point(lon, lat)),
        metadata: Default::default(),
    })
    .collect();

    let added = engine.add_documents(documents).await?;
    println!("✓ Ingested {} sample documents\n", added);
    Ok(())
}
