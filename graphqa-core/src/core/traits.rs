//! Contracts for the external collaborators: the language model, the
//! embedding client, and the OpenIE extractor.
//!
//! The core treats all three as blocking calls with no reentrancy; batching
//! happens inside the implementations.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::{Result, Triple};

/// One chat message in a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role: `system`, `user`, or `assistant`
    pub role: String,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Build a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Build a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Build an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Result of one language model inference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The model's text output
    pub response: String,
    /// Provider metadata (model name, token usage, finish reason, ...)
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
}

/// Language model client contract.
///
/// Called at three sites: reranker prompts, QA prompts, and the OpenIE
/// extraction prompts. Implementations own their retry budget.
pub trait LanguageModel: Send + Sync {
    /// Run one inference over a chat prompt
    fn infer(&self, messages: &[ChatMessage]) -> Result<ChatResponse>;
}

/// Embedding client contract.
///
/// Returns one vector per input text, in input order. When `instruction` is
/// given it is prepended (plus a space) to each text before encoding; when
/// `norm` is set, outputs are L2-normalized before being returned.
pub trait Embedder: Send + Sync {
    /// Encode a batch of texts
    fn batch_encode(
        &self,
        texts: &[String],
        instruction: Option<&str>,
        norm: bool,
    ) -> Result<Vec<Vec<f64>>>;
}

/// Per-chunk named-entity extraction output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NerOutput {
    /// Chunk this output belongs to
    pub chunk_id: String,
    /// Raw model response, if any
    #[serde(default)]
    pub response: Option<String>,
    /// Distinct entity surface forms found in the chunk
    pub unique_entities: Vec<String>,
    /// Extraction metadata
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
}

/// Per-chunk triple extraction output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripleOutput {
    /// Chunk this output belongs to
    pub chunk_id: String,
    /// Raw model response, if any
    #[serde(default)]
    pub response: Option<String>,
    /// Extracted (subject, relation, object) triples; may contain malformed
    /// rows that the indexer filters before graph construction
    pub triples: Vec<Vec<String>>,
    /// Extraction metadata
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
}

impl TripleOutput {
    /// Well-formed triples only: length exactly 3, deduplicated
    pub fn valid_triples(&self) -> Vec<Triple> {
        crate::text::filter_invalid_triples(&self.triples)
    }
}

/// Open information extraction contract.
///
/// Input is an ordered map `chunk_id → passage text`; the two output maps are
/// keyed by the same chunk ids. Online and offline modes share this contract
/// and differ only in when they run.
pub trait OpenIe: Send + Sync {
    /// Extract entities and triples for a batch of chunks
    fn batch_openie(
        &self,
        chunks: &IndexMap<String, String>,
    ) -> Result<(HashMap<String, NerOutput>, HashMap<String, TripleOutput>)>;
}
