//! Deterministic mock collaborators for tests and dry runs.
//!
//! The mock LLM replays scripted responses (keyed by a substring match on the
//! last user message, with an ordered-queue fallback); the mock embedder
//! wraps the hash embedder with optional fixed vectors per text; the mock
//! extractor replays scripted per-passage extractions.

use std::collections::HashMap;
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::core::traits::{
    ChatMessage, ChatResponse, Embedder, LanguageModel, NerOutput, OpenIe, TripleOutput,
};
use crate::core::{GraphQaError, Result};
use crate::embeddings::HashEmbedder;

/// Scripted language model.
pub struct MockLanguageModel {
    rules: Vec<(String, String)>,
    queue: Mutex<Vec<String>>,
    default_response: Option<String>,
    fail_always: bool,
    /// Number of `infer` calls seen
    pub calls: Mutex<usize>,
}

impl MockLanguageModel {
    /// Model answering every prompt with `response`
    pub fn always(response: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            queue: Mutex::new(Vec::new()),
            default_response: Some(response.into()),
            fail_always: false,
            calls: Mutex::new(0),
        }
    }

    /// Model erroring on every call
    pub fn failing() -> Self {
        Self {
            rules: Vec::new(),
            queue: Mutex::new(Vec::new()),
            default_response: None,
            fail_always: true,
            calls: Mutex::new(0),
        }
    }

    /// Model with substring-matched responses; unmatched prompts pop the
    /// queue, then fall back to `default`.
    pub fn scripted(
        rules: Vec<(String, String)>,
        queue: Vec<String>,
        default: Option<String>,
    ) -> Self {
        let mut queue = queue;
        queue.reverse(); // pop from the back in input order
        Self {
            rules,
            queue: Mutex::new(queue),
            default_response: default,
            fail_always: false,
            calls: Mutex::new(0),
        }
    }
}

impl LanguageModel for MockLanguageModel {
    fn infer(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        *self.calls.lock().unwrap() += 1;
        if self.fail_always {
            return Err(GraphQaError::LanguageModel {
                message: "mock language model configured to fail".to_string(),
            });
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let response = self
            .rules
            .iter()
            .find(|(needle, _)| last_user.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .or_else(|| self.queue.lock().unwrap().pop())
            .or_else(|| self.default_response.clone())
            .ok_or_else(|| GraphQaError::LanguageModel {
                message: "mock language model has no response for prompt".to_string(),
            })?;
        Ok(ChatResponse {
            response,
            metadata: IndexMap::new(),
        })
    }
}

/// Deterministic embedder: fixed vectors for registered texts, hash
/// embeddings for everything else.
pub struct MockEmbedder {
    inner: HashEmbedder,
    fixed: HashMap<String, Vec<f64>>,
    dimension: usize,
}

impl MockEmbedder {
    /// Hash-backed embedder of the given dimension
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dimension),
            fixed: HashMap::new(),
            dimension,
        }
    }

    /// Pin the (pre-normalization) vector returned for `text`.
    ///
    /// The instruction prefix is ignored for pinned texts, so a pinned
    /// entity embeds identically at index and query time.
    pub fn with_fixed(mut self, text: impl Into<String>, vector: Vec<f64>) -> Self {
        assert_eq!(vector.len(), self.dimension, "fixed vector dimension mismatch");
        self.fixed.insert(text.into(), vector);
        self
    }
}

impl Embedder for MockEmbedder {
    fn batch_encode(
        &self,
        texts: &[String],
        instruction: Option<&str>,
        norm: bool,
    ) -> Result<Vec<Vec<f64>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            if let Some(fixed) = self.fixed.get(text) {
                let mut vector = fixed.clone();
                if norm {
                    let length: f64 = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
                    if length > 0.0 {
                        for x in &mut vector {
                            *x /= length;
                        }
                    }
                }
                out.push(vector);
            } else {
                out.extend(
                    self.inner
                        .batch_encode(std::slice::from_ref(text), instruction, norm)?,
                );
            }
        }
        Ok(out)
    }
}

/// Scripted OpenIE extractor keyed by passage text.
pub struct MockOpenIe {
    by_passage: HashMap<String, (Vec<String>, Vec<Vec<String>>)>,
    /// Number of `batch_openie` chunk extractions performed
    pub extracted: Mutex<usize>,
}

impl MockOpenIe {
    /// Build an extractor from `(passage, entities, triples)` scripts
    pub fn new(scripts: Vec<(&str, Vec<&str>, Vec<[&str; 3]>)>) -> Self {
        let by_passage = scripts
            .into_iter()
            .map(|(passage, entities, triples)| {
                (
                    passage.to_string(),
                    (
                        entities.into_iter().map(|e| e.to_string()).collect(),
                        triples
                            .into_iter()
                            .map(|t| t.iter().map(|s| s.to_string()).collect())
                            .collect(),
                    ),
                )
            })
            .collect();
        Self {
            by_passage,
            extracted: Mutex::new(0),
        }
    }
}

impl OpenIe for MockOpenIe {
    fn batch_openie(
        &self,
        chunks: &IndexMap<String, String>,
    ) -> Result<(HashMap<String, NerOutput>, HashMap<String, TripleOutput>)> {
        let mut ner = HashMap::new();
        let mut triples = HashMap::new();
        for (chunk_id, passage) in chunks {
            *self.extracted.lock().unwrap() += 1;
            let (entities, rows) = self
                .by_passage
                .get(passage)
                .cloned()
                .unwrap_or_else(|| (Vec::new(), Vec::new()));
            ner.insert(
                chunk_id.clone(),
                NerOutput {
                    chunk_id: chunk_id.clone(),
                    response: None,
                    unique_entities: entities,
                    metadata: IndexMap::new(),
                },
            );
            triples.insert(
                chunk_id.clone(),
                TripleOutput {
                    chunk_id: chunk_id.clone(),
                    response: None,
                    triples: rows,
                    metadata: IndexMap::new(),
                },
            );
        }
        Ok((ner, triples))
    }
}
