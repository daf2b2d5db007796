use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for the whole retrieval engine.
///
/// Every section falls back to its defaults when omitted from the YAML file.
/// Leaving out `llm` means no generation backend is attached and answers are
/// produced from a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Configuration for the text-embedding capability.
///
/// The model is asymmetric: queries and documents are embedded with different
/// literal prefixes. Changing `model` or either prefix invalidates every stored
/// document embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub query_prefix: String,
    pub document_prefix: String,
    /// Upper bound on a single embedding call, in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of cached embeddings. Zero disables the cache.
    pub cache_capacity: u64,
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "embeddinggemma".to_string(),
            dimension: 768,
            query_prefix: "task: search result | query: ".to_string(),
            document_prefix: "title: none | text: ".to_string(),
            timeout_ms: 10_000,
            cache_capacity: 1_024,
        }
    }
}

/// Configuration for the answer-generation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_system_prompt() -> String {
    "You are a geospatial reasoning assistant. Your task is to answer questions \
using ONLY the provided spatial documents as context.

Rules:
1. Only use information from the provided documents
2. Reference document locations when relevant to the answer
3. If documents don't contain enough information, say so explicitly
4. Consider spatial relationships between documents when reasoning
5. Cite document numbers when referencing specific information

Format your response clearly and concisely."
        .to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen3:0.6b".to_string(),
            temperature: 0.0,
            system_prompt: default_system_prompt(),
        }
    }
}

/// Ranking and candidate-fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Weight of semantic similarity in the hybrid score.
    pub alpha: f64,
    /// Weight of spatial proximity in the hybrid score.
    pub beta: f64,
    pub default_top_k: usize,
    /// Ceiling that every requested `top_k` is clamped to.
    pub max_top_k: usize,
    /// The store is asked for `top_k * candidate_multiplier` nearest candidates.
    pub candidate_multiplier: usize,
    /// Radius used when a request gives a center but no radius.
    pub default_radius_m: f64,
    pub fetch_timeout_ms: u64,
}

impl RetrievalConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            beta: 0.3,
            default_top_k: 10,
            max_top_k: 100,
            candidate_multiplier: 4,
            default_radius_m: 1_000.0,
            fetch_timeout_ms: 10_000,
        }
    }
}

/// Candidate store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StorageMode {
    /// In-process store with exact search (default)
    Memory,
    /// Remote Qdrant server reached over gRPC
    Qdrant { url: String },
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub storage_mode: StorageMode,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

fn default_collection_name() -> String {
    "spatial_docs".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::default(),
            collection_name: default_collection_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/spatial-rag.sock".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `path` if the file exists, otherwise use
    /// defaults. A file that exists but cannot be read or parsed is an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_retrieval_defaults_keep_reference_weights() {
        let config = RetrievalConfig::default();
        assert_eq!(config.alpha, 0.7);
        assert_eq!(config.beta, 0.3);
        assert!((config.alpha + config.beta - 1.0).abs() < 1e-12);
        assert_eq!(config.default_top_k, 10);
        assert_eq!(config.max_top_k, 100);
        assert_eq!(config.default_radius_m, 1_000.0);
    }

    #[test]
    fn test_embedding_prefixes_differ() {
        let config = EmbeddingConfig::default();
        assert_ne!(config.query_prefix, config.document_prefix);
        assert_eq!(config.dimension, 768);
        assert_eq!(config.timeout(), Duration::from_millis(10_000));
    }

    #[test]
    fn test_default_has_no_generation_backend() {
        let config = Config::default();
        assert!(config.llm.is_none());
        assert!(matches!(config.storage.storage_mode, StorageMode::Memory));
        assert_eq!(config.storage.collection_name, "spatial_docs");
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "retrieval:\n  alpha: 0.5\n  beta: 0.5\n  default_top_k: 5\n  max_top_k: 20\n  default_radius_m: 250.0\nllm:\n  base_url: http://gen:11434\n  model: llama3.2\nstorage:\n  storage_mode:\n    mode: qdrant\n    url: http://localhost:6334\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.retrieval.alpha, 0.5);
        assert_eq!(config.retrieval.default_radius_m, 250.0);
        assert_eq!(config.retrieval.candidate_multiplier, 4);
        let llm = config.llm.unwrap();
        assert_eq!(llm.model, "llama3.2");
        assert_eq!(llm.temperature, 0.0);
        assert!(llm.system_prompt.contains("geospatial"));
        assert!(matches!(
            config.storage.storage_mode,
            StorageMode::Qdrant { ref url } if url == "http://localhost:6334"
        ));
        assert_eq!(config.embedding.model, "embeddinggemma");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = Config::load("/nonexistent/spatial-rag.yaml");
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }

    #[test]
    fn test_load_or_default_falls_back_only_when_missing() {
        let config = Config::load_or_default("/nonexistent/spatial-rag.yaml").unwrap();
        assert_eq!(config.retrieval.alpha, 0.7);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "retrieval: [not, a, mapping]").unwrap();
        let result = Config::load_or_default(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
