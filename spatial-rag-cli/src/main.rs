use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use spatial_rag_core::config::{Config, StorageMode};
use spatial_rag_core::rag::{AnswerEvent, Document, GeoPoint, Geometry, NewDocument, QueryRequest, QueryResponse};
use spatial_rag_core::server::{Client, Frame, Reply, Request};
use spatial_rag_core::Server;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Documents sent per ingest request.
const INGEST_BATCH: usize = 64;

#[derive(Parser)]
#[command(name = "spatial-rag")]
#[command(about = "Hybrid spatial-semantic retrieval over geolocated documents", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the retrieval server on the configured socket")]
    Serve,

    #[command(about = "Ask a question, optionally near a point or inside a region")]
    Query {
        #[arg(help = "Question text")]
        text: String,

        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, help = "Radius in meters (defaults to retrieval.default_radius_m)")]
        radius: Option<f64>,

        #[arg(long, help = "GeoJSON file holding a Polygon geometry", conflicts_with_all = ["lon", "lat", "radius"])]
        region: Option<PathBuf>,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[arg(long, help = "Only list documents, skip answer synthesis")]
        no_answer: bool,

        #[arg(long, help = "Stream the answer as it is generated")]
        stream: bool,
    },

    #[command(about = "Ingest documents from a JSON Lines file")]
    Ingest {
        #[arg(help = "One document per line: {id, title, content, geometry?, metadata?}")]
        file: PathBuf,
    },

    #[command(about = "List stored documents, newest first")]
    Documents {
        #[arg(long, default_value_t = 100)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    #[command(about = "Show one stored document")]
    Show {
        #[arg(help = "Document id")]
        id: String,
    },

    #[command(about = "Check that the server is up")]
    Health,

    #[command(about = "Show current configuration")]
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Query {
            text,
            lon,
            lat,
            radius,
            region,
            top_k,
            no_answer,
            stream,
        } => {
            let mut request = QueryRequest::new(text);
            if let (Some(lon), Some(lat)) = (lon, lat) {
                request = request.with_center(GeoPoint::new(lon, lat));
            }
            request.radius_m = radius;
            if let Some(path) = region {
                request.region = Some(read_region(&path)?);
            }
            request.top_k = top_k;
            if no_answer {
                request = request.without_answer();
            }
            let client = Client::new(&config.server.socket_path);
            if stream {
                stream_query(&client, request).await
            } else {
                query(&client, request).await
            }
        }
        Commands::Ingest { file } => ingest(&Client::new(&config.server.socket_path), &file).await,
        Commands::Documents { limit, offset } => {
            list_documents(&Client::new(&config.server.socket_path), limit, offset).await
        }
        Commands::Show { id } => show_document(&Client::new(&config.server.socket_path), &id).await,
        Commands::Health => health(&Client::new(&config.server.socket_path)).await,
        Commands::Config => {
            show_config(&config);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load_or_default(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn read_region(path: &Path) -> Result<Geometry> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read region file {}", path.display()))?;
    serde_json::from_str(&content).context("Region file is not a GeoJSON geometry")
}

async fn serve(config: Config) -> Result<()> {
    info!(
        socket = %config.server.socket_path,
        embedding_model = %config.embedding.model,
        "Starting server"
    );
    let server = Server::new(config).await.context("Failed to start engine")?;
    server.start().await.context("Server failed")?;
    Ok(())
}

/// Sends a request that expects one reply and returns its result.
async fn call(client: &Client, request: Request) -> Result<serde_json::Value> {
    let mut reply = None;
    client
        .call(&request, |frame| {
            if let Frame::Reply(r) = frame {
                reply = Some(r);
            }
        })
        .await
        .context("Failed to reach server. Is `spatial-rag serve` running?")?;

    match reply {
        Some(Reply::Ok { result }) => Ok(result),
        Some(Reply::Error { kind, error }) => bail!("{} ({})", error, kind),
        None => bail!("Server closed the connection without a reply"),
    }
}

async fn query(client: &Client, request: QueryRequest) -> Result<()> {
    let result = call(client, Request::Query(request)).await?;
    let response: QueryResponse = serde_json::from_value(result).context("Malformed query response")?;

    println!(
        "{} {} document(s) for {}",
        "→".blue(),
        response.total_count,
        response.query.bold()
    );
    println!();
    for (i, doc) in response.documents.iter().enumerate() {
        let distance = doc
            .spatial_distance_m
            .map(|m| format!(", {:.0} m", m))
            .unwrap_or_default();
        println!(
            "  {} {} {} (hybrid {:.3}, semantic {:.3}{})",
            format!("{}.", i + 1).cyan(),
            doc.document.title.bold(),
            format!("[{}]", doc.document.id).dimmed(),
            doc.scores.hybrid,
            doc.scores.semantic,
            distance
        );
    }

    if let Some(answer) = response.answer {
        println!();
        println!("{}", "Answer:".bold().green());
        println!("{}", answer);
    }
    Ok(())
}

async fn stream_query(client: &Client, request: QueryRequest) -> Result<()> {
    let mut failure = None;
    client
        .call(&Request::Stream(request), |frame| match frame {
            Frame::Event(AnswerEvent::Metadata { doc_count, documents }) => {
                println!("{} {} document(s)", "→".blue(), doc_count);
                for doc in documents {
                    println!("  {} {}", "•".cyan(), doc.document.title);
                }
                println!();
            }
            Frame::Event(AnswerEvent::Chunk { chunk }) => {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            }
            Frame::Event(AnswerEvent::Done) => println!(),
            Frame::Event(AnswerEvent::Error { error }) => failure = Some(error),
            Frame::Reply(Reply::Error { error, .. }) => failure = Some(error),
            Frame::Reply(Reply::Ok { .. }) => {}
        })
        .await
        .context("Failed to reach server. Is `spatial-rag serve` running?")?;

    match failure {
        Some(error) => bail!("{}", error),
        None => Ok(()),
    }
}

async fn ingest(client: &Client, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut documents = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let document: NewDocument = serde_json::from_str(line)
            .with_context(|| format!("Invalid document on line {}", number + 1))?;
        documents.push(document);
    }

    let total = documents.len();
    for batch in documents.chunks(INGEST_BATCH) {
        call(
            client,
            Request::AddDocuments {
                documents: batch.to_vec(),
            },
        )
        .await?;
    }

    println!(
        "{} Ingested {} document(s) from {}",
        "✓".green().bold(),
        total,
        path.display()
    );
    Ok(())
}

async fn list_documents(client: &Client, limit: usize, offset: usize) -> Result<()> {
    let result = call(client, Request::Documents { limit, offset }).await?;
    let documents: Vec<Document> = serde_json::from_value(result).context("Malformed document list")?;

    if documents.is_empty() {
        println!("{}", "No documents stored. Add some with 'spatial-rag ingest <file>'".yellow());
        return Ok(());
    }

    for doc in documents {
        let kind = doc.geometry.as_ref().map(|g| g.kind()).unwrap_or("-");
        println!(
            "  {} {} {} {}",
            "•".cyan(),
            doc.id.bold(),
            doc.title,
            format!("({}, {})", kind, doc.created_at.format("%Y-%m-%d %H:%M")).dimmed()
        );
    }
    Ok(())
}

async fn show_document(client: &Client, id: &str) -> Result<()> {
    let result = call(client, Request::Document { id: id.to_string() }).await?;
    let doc: Document = serde_json::from_value(result).context("Malformed document")?;

    println!("{}", doc.title.bold().green());
    println!("  ID:        {}", doc.id.cyan());
    if let Some(geometry) = &doc.geometry {
        println!("  Location:  {}", geometry.to_wkt());
    }
    println!("  Created:   {}", doc.created_at);
    println!("  Updated:   {}", doc.updated_at);
    if !doc.metadata.is_empty() {
        println!("  Metadata:  {}", serde_json::to_string(&doc.metadata)?);
    }
    println!();
    println!("{}", doc.content);
    Ok(())
}

async fn health(client: &Client) -> Result<()> {
    let result = call(client, Request::Health).await?;
    println!("{}", "Server is up".bold().green());
    println!("{}", serde_yaml::to_string(&result)?);
    Ok(())
}

fn show_config(config: &Config) {
    println!("{}", "Current Configuration:".bold().green());
    println!();
    println!("{}", "Embedding:".bold());
    println!("  Model:           {}", config.embedding.model.cyan());
    println!("  Base URL:        {}", config.embedding.base_url);
    println!("  Dimension:       {}", config.embedding.dimension);
    println!("  Query prefix:    {:?}", config.embedding.query_prefix);
    println!("  Document prefix: {:?}", config.embedding.document_prefix);
    println!();
    println!("{}", "Generation:".bold());
    match &config.llm {
        Some(llm) => {
            println!("  Model:           {}", llm.model.cyan());
            println!("  Base URL:        {}", llm.base_url);
            println!("  Temperature:     {}", llm.temperature);
        }
        None => println!("  {}", "not configured (templated answers)".yellow()),
    }
    println!();
    println!("{}", "Retrieval:".bold());
    println!("  Alpha / Beta:    {} / {}", config.retrieval.alpha, config.retrieval.beta);
    println!("  Top K:           {} (max {})", config.retrieval.default_top_k, config.retrieval.max_top_k);
    println!("  Default radius:  {} m", config.retrieval.default_radius_m);
    println!();
    println!("{}", "Storage:".bold());
    match &config.storage.storage_mode {
        StorageMode::Memory => println!("  Mode:            memory"),
        StorageMode::Qdrant { url } => println!("  Mode:            qdrant ({})", url),
    }
    println!("  Collection:      {}", config.storage.collection_name);
    println!("  Socket:          {}", config.server.socket_path);
}
