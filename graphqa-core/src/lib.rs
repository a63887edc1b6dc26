//! # graphqa-core
//!
//! Graph-indexed hybrid retrieval-augmented question answering.
//!
//! Passages are content-addressed and embedded; OpenIE triples extracted from
//! each passage become a heterogeneous graph that interleaves passage nodes,
//! phrase nodes, and similarity edges between synonymous phrases. At query
//! time, dense passage retrieval is fused with personalized PageRank seeded
//! from query-linked facts, and the top-ranked passages feed a QA prompt.
//!
//! ## Quick start
//!
//! ```no_run
//! use graphqa_core::{Config, GraphQa};
//!
//! # fn example() -> graphqa_core::Result<()> {
//! let config = Config::default();
//! let mut session = GraphQa::with_default_clients(config)?;
//! session.index(&["Paris is the capital of France.".to_string()])?;
//! let solutions = session.retrieve(&["What is the capital of France?".to_string()], 5)?;
//! println!("top passage: {:?}", solutions[0].docs.first());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Configuration management
pub mod config;
/// Core types, ids, and error handling
pub mod core;
/// Embedding clients
pub mod embeddings;
/// Answer evaluation metrics
pub mod evaluation;
/// Property graph and personalized PageRank
pub mod graph;
/// Indexing: chunk insert, OpenIE merge, graph construction
pub mod index;
/// Language model client
pub mod llm;
/// Open information extraction
pub mod openie;
/// Prompt template registry
pub mod prompts;
/// QA prompt assembly and answer parsing
pub mod qa;
/// LLM-driven fact filter
pub mod rerank;
/// Hybrid retrieval: dense scores fused with graph search
pub mod retrieval;
/// Persistent stores
pub mod storage;
/// Text processing utilities
pub mod text;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use lru::LruCache;

pub use crate::config::{Config, OpenIeMode};
pub use crate::core::{
    chunk_hash_id, content_hash, entity_hash_id, fact_hash_id, GraphQaError, QuerySolution,
    Result, Triple,
};
pub use crate::core::traits::{ChatMessage, ChatResponse, Embedder, LanguageModel, OpenIe};
pub use crate::evaluation::QaMetrics;
pub use crate::graph::SimpleGraph;
pub use crate::storage::EmbeddingStore;

use crate::core::{CHUNK_NS, ENTITY_NS, FACT_NS};
use crate::openie::LlmOpenIe;
use crate::prompts::PromptRegistry;
use crate::rerank::FactReranker;
use crate::retrieval::{QueryEmbeddings, RetrievalState};
use crate::storage::OpenIeCache;

/// Counts describing the current session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Rows in the chunk store
    pub chunks: usize,
    /// Rows in the entity store
    pub entities: usize,
    /// Rows in the fact store
    pub facts: usize,
    /// Graph vertices
    pub graph_vertices: usize,
    /// Graph edge records
    pub graph_edges: usize,
}

/// One graphqa session: owns the stores, the graph, and the collaborator
/// clients, and exposes `index`, `delete`, `retrieve`, and `rag_qa`.
///
/// All state belongs to this one value and is mutated sequentially; external
/// calls (LLM, embeddings) are blocking. Concurrent use of one session is not
/// supported — parallel drivers run one session per sample in distinct
/// working directories.
pub struct GraphQa {
    pub(crate) config: Config,
    pub(crate) working_dir: PathBuf,
    pub(crate) llm: Arc<dyn LanguageModel>,
    pub(crate) embedder: Box<dyn Embedder>,
    pub(crate) openie: Box<dyn OpenIe>,
    pub(crate) prompts: PromptRegistry,
    pub(crate) reranker: FactReranker,
    pub(crate) chunk_store: EmbeddingStore,
    pub(crate) entity_store: EmbeddingStore,
    pub(crate) fact_store: EmbeddingStore,
    pub(crate) graph: SimpleGraph,
    pub(crate) openie_cache: OpenIeCache,
    pub(crate) retrieval: Option<RetrievalState>,
    pub(crate) query_cache: LruCache<String, QueryEmbeddings>,
}

impl GraphQa {
    /// Open a session with explicit collaborator clients.
    ///
    /// Loads any existing stores and graph from the working directory
    /// (`{save_dir}/{llm_label}_{embedding_label}`); with
    /// `force_index_from_scratch` the persisted artifacts are removed first.
    pub fn new(
        config: Config,
        llm: Arc<dyn LanguageModel>,
        embedder: Box<dyn Embedder>,
        openie: Box<dyn OpenIe>,
    ) -> Result<Self> {
        let working_dir = config.working_dir();
        std::fs::create_dir_all(&working_dir)?;

        if config.indexing.force_index_from_scratch {
            for name in [
                format!("vdb_{CHUNK_NS}.json"),
                format!("vdb_{ENTITY_NS}.json"),
                format!("vdb_{FACT_NS}.json"),
                "graph.json".to_string(),
            ] {
                let path = working_dir.join(name);
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
            tracing::info!(dir = %working_dir.display(), "removed persisted index state");
        }

        let chunk_store = EmbeddingStore::open(&working_dir, CHUNK_NS)?;
        let entity_store = EmbeddingStore::open(&working_dir, ENTITY_NS)?;
        let fact_store = EmbeddingStore::open(&working_dir, FACT_NS)?;

        let graph_path = working_dir.join("graph.json");
        let graph = if graph_path.exists() {
            SimpleGraph::load(&graph_path)?
        } else {
            SimpleGraph::new(config.indexing.directed_graph)
        };

        let mut prompts = PromptRegistry::new();
        if let Some(path) = &config.rerank_dspy_file_path {
            prompts.load_fact_filter_file(path)?;
        }

        let openie_cache = OpenIeCache::new(&working_dir, &config.llm_label());
        let reranker = FactReranker::new(llm.clone());
        let cache_size = NonZeroUsize::new(config.retrieval.query_cache_size)
            .unwrap_or_else(|| NonZeroUsize::new(256).expect("nonzero"));

        Ok(Self {
            config,
            working_dir,
            llm,
            embedder,
            openie,
            prompts,
            reranker,
            chunk_store,
            entity_store,
            fact_store,
            graph,
            openie_cache,
            retrieval: None,
            query_cache: LruCache::new(cache_size),
        })
    }

    /// Open a session with clients built from the config: an
    /// OpenAI-compatible chat client, the configured embedder, and the
    /// LLM-driven OpenIE extractor.
    pub fn with_default_clients(config: Config) -> Result<Self> {
        let llm: Arc<dyn LanguageModel> = Arc::new(llm::OpenAiChatClient::new(&config.llm)?);
        let embedder = embeddings::embedder_from_config(&config.embedding)?;
        let openie = Box::new(LlmOpenIe::new(llm.clone()));
        Self::new(config, llm, embedder, openie)
    }

    /// The session configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The resolved working directory
    pub fn working_dir(&self) -> &std::path::Path {
        &self.working_dir
    }

    /// Direct access to the graph (read-only)
    pub fn graph(&self) -> &SimpleGraph {
        &self.graph
    }

    /// Whether the fact store still holds this (processed) triple
    pub fn contains_fact(&self, triple: &Triple) -> bool {
        self.fact_store.contains(&fact_hash_id(triple))
    }

    /// Store and graph size counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            chunks: self.chunk_store.len(),
            entities: self.entity_store.len(),
            facts: self.fact_store.len(),
            graph_vertices: self.graph.vcount(),
            graph_edges: self.graph.ecount(),
        }
    }

    pub(crate) fn graph_path(&self) -> PathBuf {
        self.working_dir.join("graph.json")
    }
}
