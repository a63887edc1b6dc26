//! Configuration for the graphqa session.
//!
//! Nested sections mirror the subsystems; every field has a serde default so
//! partial config files work. Files load from TOML or JSON, detected by
//! extension.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{GraphQaError, Result};

/// When OpenIE extraction runs relative to indexing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpenIeMode {
    /// Extract during `index`
    Online,
    /// Extraction happens in a separate `pre_openie` pass; `index` only
    /// consumes the cache
    Offline,
    /// Offline with a locally hosted extraction model; cache semantics are
    /// identical to `Offline`
    TransformersOffline,
}

impl OpenIeMode {
    /// Whether `index` may call the extractor itself
    pub fn extracts_inline(&self) -> bool {
        matches!(self, OpenIeMode::Online)
    }
}

impl std::str::FromStr for OpenIeMode {
    type Err = GraphQaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(OpenIeMode::Online),
            "offline" => Ok(OpenIeMode::Offline),
            "transformers-offline" | "transformers_offline" => Ok(OpenIeMode::TransformersOffline),
            other => Err(GraphQaError::Config {
                message: format!("unknown openie mode: {other}"),
            }),
        }
    }
}

/// Language model client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model name, e.g. `gpt-4o-mini`
    #[serde(default = "default_llm_name")]
    pub name: String,
    /// OpenAI-compatible base URL; None means the public OpenAI endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Retry budget for transient failures
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            name: default_llm_name(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retry_attempts: default_max_retry_attempts(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Embedding client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model name; the reserved name `local-hash` selects the
    /// deterministic offline embedder
    #[serde(default = "default_embedding_name")]
    pub name: String,
    /// OpenAI-compatible base URL; None means the public OpenAI endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    /// Vector dimension (used by the offline embedder; remote embedders
    /// define their own)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Retry budget for transient failures
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            name: default_embedding_name(),
            base_url: None,
            dimension: default_embedding_dimension(),
            timeout_seconds: default_timeout_seconds(),
            max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

/// Graph construction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// When OpenIE runs
    #[serde(default = "default_openie_mode")]
    pub openie_mode: OpenIeMode,
    /// Neighbors considered per entity when adding synonymy edges
    #[serde(default = "default_synonymy_edge_topk")]
    pub synonymy_edge_topk: usize,
    /// Cosine similarity floor for synonymy edges
    #[serde(default = "default_synonymy_edge_sim_threshold")]
    pub synonymy_edge_sim_threshold: f64,
    /// Interpret graph edges as directed
    #[serde(default)]
    pub directed_graph: bool,
    /// Wipe stores and graph before opening the session
    #[serde(default)]
    pub force_index_from_scratch: bool,
    /// Ignore the OpenIE cache and re-extract everything
    #[serde(default)]
    pub force_openie_from_scratch: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            openie_mode: default_openie_mode(),
            synonymy_edge_topk: default_synonymy_edge_topk(),
            synonymy_edge_sim_threshold: default_synonymy_edge_sim_threshold(),
            directed_graph: false,
            force_index_from_scratch: false,
            force_openie_from_scratch: false,
        }
    }
}

/// Retrieval and QA settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Facts (and distinct phrases) carried into graph search
    #[serde(default = "default_linking_top_k")]
    pub linking_top_k: usize,
    /// Weight multiplier for passage nodes in the PPR reset vector
    #[serde(default = "default_passage_node_weight")]
    pub passage_node_weight: f64,
    /// PageRank damping factor
    #[serde(default = "default_damping")]
    pub damping: f64,
    /// Passages handed to the QA prompt
    #[serde(default = "default_qa_top_k")]
    pub qa_top_k: usize,
    /// Entries kept in the per-session query-embedding cache
    #[serde(default = "default_query_cache_size")]
    pub query_cache_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            linking_top_k: default_linking_top_k(),
            passage_node_weight: default_passage_node_weight(),
            damping: default_damping(),
            qa_top_k: default_qa_top_k(),
            query_cache_size: default_query_cache_size(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base output directory; the session works in
    /// `{save_dir}/{llm_label}_{embedding_label}`
    #[serde(default = "default_save_dir")]
    pub save_dir: String,
    /// Dataset label, selects the QA prompt template `rag_qa_<dataset>`
    #[serde(default = "default_dataset")]
    pub dataset: String,
    /// Language model section
    #[serde(default)]
    pub llm: LlmConfig,
    /// Embedding section
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Indexing section
    #[serde(default)]
    pub indexing: IndexingConfig,
    /// Retrieval section
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Optional JSON file with compiled reranker demos
    #[serde(default)]
    pub rerank_dspy_file_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            dataset: default_dataset(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            rerank_dspy_file_path: None,
        }
    }
}

impl Config {
    /// Load from a TOML or JSON file, detected by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&raw).map_err(|e| GraphQaError::Config {
                message: format!("failed to parse {}: {e}", path.display()),
            }),
            Some("json") => Ok(serde_json::from_str(&raw)?),
            other => Err(GraphQaError::Config {
                message: format!(
                    "unsupported config extension {:?} for {}",
                    other,
                    path.display()
                ),
            }),
        }
    }

    /// Filesystem-safe label for the language model
    pub fn llm_label(&self) -> String {
        sanitize_label(&self.llm.name)
    }

    /// Filesystem-safe label for the embedding model
    pub fn embedding_label(&self) -> String {
        sanitize_label(&self.embedding.name)
    }

    /// Working directory holding the stores, the graph, and the OpenIE cache
    pub fn working_dir(&self) -> PathBuf {
        PathBuf::from(&self.save_dir)
            .join(format!("{}_{}", self.llm_label(), self.embedding_label()))
    }
}

/// Replace path-hostile characters so model names can name directories
pub fn sanitize_label(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn default_save_dir() -> String {
    "outputs".to_string()
}

fn default_dataset() -> String {
    "musique".to_string()
}

fn default_llm_name() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_name() -> String {
    "local-hash".to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_temperature() -> f64 {
    0.0
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_openie_mode() -> OpenIeMode {
    OpenIeMode::Online
}

fn default_synonymy_edge_topk() -> usize {
    100
}

fn default_synonymy_edge_sim_threshold() -> f64 {
    0.8
}

fn default_linking_top_k() -> usize {
    5
}

fn default_passage_node_weight() -> f64 {
    0.05
}

fn default_damping() -> f64 {
    0.5
}

fn default_qa_top_k() -> usize {
    5
}

fn default_query_cache_size() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retrieval.damping, 0.5);
        assert_eq!(config.retrieval.passage_node_weight, 0.05);
        assert_eq!(config.indexing.synonymy_edge_sim_threshold, 0.8);
        assert_eq!(config.llm.max_retry_attempts, 5);
        assert_eq!(config.indexing.openie_mode, OpenIeMode::Online);
    }

    #[test]
    fn test_working_dir_labels() {
        let mut config = Config::default();
        config.save_dir = "out".to_string();
        config.llm.name = "meta/llama-3".to_string();
        config.embedding.name = "nvidia/nv-embed-v2".to_string();
        assert_eq!(
            config.working_dir(),
            PathBuf::from("out/meta_llama-3_nvidia_nv-embed-v2")
        );
    }

    #[test]
    fn test_partial_toml_parses() {
        let parsed: Config = toml::from_str(
            r#"
                save_dir = "custom"

                [retrieval]
                linking_top_k = 10
            "#,
        )
        .unwrap();
        assert_eq!(parsed.save_dir, "custom");
        assert_eq!(parsed.retrieval.linking_top_k, 10);
        assert_eq!(parsed.retrieval.damping, 0.5);
    }

    #[test]
    fn test_openie_mode_parse() {
        assert_eq!("online".parse::<OpenIeMode>().unwrap(), OpenIeMode::Online);
        assert_eq!(
            "transformers-offline".parse::<OpenIeMode>().unwrap(),
            OpenIeMode::TransformersOffline
        );
        assert!("nope".parse::<OpenIeMode>().is_err());
    }
}
