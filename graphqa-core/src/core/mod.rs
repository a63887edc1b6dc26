//! Core data structures and abstractions for graphqa
//!
//! Content-addressed identifiers, the triple/fact types shared by the
//! indexer and retriever, and the error types.

pub mod error;
pub mod mock_providers;
pub mod traits;

pub use error::{ErrorContext, ErrorSeverity, GraphQaError, Result};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Namespace prefix for passage chunk ids
pub const CHUNK_NS: &str = "chunk";
/// Namespace prefix for phrase (entity) ids
pub const ENTITY_NS: &str = "entity";
/// Namespace prefix for fact (triple) ids
pub const FACT_NS: &str = "fact";

/// Deterministic content-addressed identifier: `prefix` + hex MD5 of the text.
///
/// Stable across calls, processes, and platforms; every row id and graph
/// vertex name in the system is produced here.
pub fn content_hash(text: &str, prefix: &str) -> String {
    let digest = Md5::digest(text.as_bytes());
    format!("{prefix}{}", hex::encode(digest))
}

/// Id of a passage chunk: `chunk-<md5(text)>`
pub fn chunk_hash_id(text: &str) -> String {
    content_hash(text, "chunk-")
}

/// Id of a phrase node: `entity-<md5(processed text)>`
pub fn entity_hash_id(processed: &str) -> String {
    content_hash(processed, "entity-")
}

/// Id of a fact: `fact-<md5(stringified triple)>`
pub fn fact_hash_id(triple: &Triple) -> String {
    content_hash(&triple.stringify(), "fact-")
}

/// An ordered (subject, relation, object) triple of processed strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Triple(pub [String; 3]);

impl Triple {
    /// Build a triple from owned parts
    pub fn new(subject: String, relation: String, object: String) -> Self {
        Self([subject, relation, object])
    }

    /// Subject slot
    pub fn subject(&self) -> &str {
        &self.0[0]
    }

    /// Relation slot
    pub fn relation(&self) -> &str {
        &self.0[1]
    }

    /// Object slot
    pub fn object(&self) -> &str {
        &self.0[2]
    }

    /// Canonical string form used for fact ids and the fact store rows:
    /// the JSON array `["s","r","o"]`.
    pub fn stringify(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Parse a triple back from its canonical string form
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_str::<[String; 3]>(s).ok().map(Triple)
    }
}

impl From<[String; 3]> for Triple {
    fn from(parts: [String; 3]) -> Self {
        Triple(parts)
    }
}

impl std::fmt::Display for Triple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.0[0], self.0[1], self.0[2])
    }
}

/// One retrieved-and-answered query, the unit flowing through
/// retrieve → qa → evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySolution {
    /// The input question
    pub question: String,
    /// Ranked passage texts
    pub docs: Vec<String>,
    /// Scores aligned with `docs`
    pub doc_scores: Vec<f64>,
    /// Model answer, populated by the QA step (None on per-query failure)
    #[serde(default)]
    pub answer: Option<String>,
    /// Gold answer aliases, when supplied for evaluation
    #[serde(default)]
    pub gold_answers: Option<Vec<String>>,
    /// Gold supporting documents, when supplied for evaluation
    #[serde(default)]
    pub gold_docs: Option<Vec<String>>,
}

impl QuerySolution {
    /// Create a solution holding only ranked passages
    pub fn new(question: String, docs: Vec<String>, doc_scores: Vec<f64>) -> Self {
        Self {
            question,
            docs,
            doc_scores,
            answer: None,
            gold_answers: None,
            gold_docs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_determinism() {
        let a = content_hash("Paris is the capital of France.", "chunk-");
        let b = content_hash("Paris is the capital of France.", "chunk-");
        assert_eq!(a, b);
        assert!(a.starts_with("chunk-"));
        // 32 hex chars after the prefix
        assert_eq!(a.len(), "chunk-".len() + 32);
    }

    #[test]
    fn test_hash_prefix_separation() {
        let as_chunk = content_hash("paris", "chunk-");
        let as_entity = content_hash("paris", "entity-");
        assert_ne!(as_chunk, as_entity);
        assert_eq!(&as_chunk["chunk-".len()..], &as_entity["entity-".len()..]);
    }

    #[test]
    fn test_triple_stringify_round_trip() {
        let t = Triple::new(
            "paris".to_string(),
            "capital of".to_string(),
            "france".to_string(),
        );
        let s = t.stringify();
        assert_eq!(Triple::parse(&s), Some(t));
    }

    #[test]
    fn test_fact_id_distinguishes_relations() {
        let a = Triple::new("a".into(), "likes".into(), "b".into());
        let b = Triple::new("a".into(), "knows".into(), "b".into());
        assert_ne!(fact_hash_id(&a), fact_hash_id(&b));
    }
}
