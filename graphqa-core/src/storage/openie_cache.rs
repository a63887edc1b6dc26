//! Persistent log of per-chunk OpenIE results.
//!
//! One file per working directory (`openie_results_ner_<llm_label>.json`).
//! Raw extractor output is preserved as-is; triple filtering happens later,
//! on the way into the graph. Because passages are content-addressed, each
//! entry's `idx` is recomputed from its passage on load, which repairs files
//! produced by older runs or other tools.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{chunk_hash_id, Result};
use crate::storage::write_json_atomic;

/// One extracted chunk: the raw passage plus the extractor's entities and
/// triples, unfiltered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIeDoc {
    /// Chunk id (recomputed from `passage` on load)
    pub idx: String,
    /// The raw passage text
    pub passage: String,
    /// Entities reported by the extractor
    pub extracted_entities: Vec<String>,
    /// Triples reported by the extractor, possibly malformed
    pub extracted_triples: Vec<Vec<String>>,
}

/// The whole cache file: docs plus corpus-level entity-size statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenIeResults {
    /// Cached per-chunk extractions
    pub docs: Vec<OpenIeDoc>,
    /// Mean entity length in characters across all docs
    pub avg_ent_chars: f64,
    /// Mean entity length in words across all docs
    pub avg_ent_words: f64,
}

impl OpenIeResults {
    /// Recompute the corpus-level entity statistics from `docs`
    pub fn recompute_stats(&mut self) {
        let mut chars = 0usize;
        let mut words = 0usize;
        let mut count = 0usize;
        for doc in &self.docs {
            for entity in &doc.extracted_entities {
                chars += entity.chars().count();
                words += entity.split_whitespace().count();
                count += 1;
            }
        }
        if count == 0 {
            self.avg_ent_chars = 0.0;
            self.avg_ent_words = 0.0;
        } else {
            self.avg_ent_chars = chars as f64 / count as f64;
            self.avg_ent_words = words as f64 / count as f64;
        }
    }
}

/// Handle on the per-workdir OpenIE cache file.
pub struct OpenIeCache {
    path: PathBuf,
}

impl OpenIeCache {
    /// Cache file for `llm_label` under `dir`
    pub fn new(dir: &Path, llm_label: &str) -> Self {
        Self {
            path: dir.join(format!("openie_results_ner_{llm_label}.json")),
        }
    }

    /// Path to the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cache; a missing file yields empty results. Every doc's
    /// `idx` is repaired to the content hash of its passage.
    pub fn load(&self) -> Result<OpenIeResults> {
        if !self.path.exists() {
            return Ok(OpenIeResults::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let mut results: OpenIeResults = serde_json::from_str(&raw)?;
        for doc in &mut results.docs {
            let expected = chunk_hash_id(&doc.passage);
            if doc.idx != expected {
                tracing::debug!(old = %doc.idx, new = %expected, "repairing cached OpenIE idx");
                doc.idx = expected;
            }
        }
        Ok(results)
    }

    /// Recompute stats and rewrite the whole file atomically
    pub fn save(&self, results: &mut OpenIeResults) -> Result<()> {
        results.recompute_stats();
        write_json_atomic(&self.path, results)
    }

    /// Split `chunk_ids` into (cached docs, ids still needing extraction)
    /// against loaded `results`.
    pub fn partition<'a>(
        results: &'a OpenIeResults,
        chunk_ids: &[String],
    ) -> (Vec<&'a OpenIeDoc>, Vec<String>) {
        let cached_ids: HashSet<&str> = results.docs.iter().map(|d| d.idx.as_str()).collect();
        let wanted: HashSet<&str> = chunk_ids.iter().map(|s| s.as_str()).collect();
        let cached: Vec<&OpenIeDoc> = results
            .docs
            .iter()
            .filter(|d| wanted.contains(d.idx.as_str()))
            .collect();
        let missing: Vec<String> = chunk_ids
            .iter()
            .filter(|id| !cached_ids.contains(id.as_str()))
            .cloned()
            .collect();
        (cached, missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(passage: &str, entities: &[&str]) -> OpenIeDoc {
        OpenIeDoc {
            idx: chunk_hash_id(passage),
            passage: passage.to_string(),
            extracted_entities: entities.iter().map(|s| s.to_string()).collect(),
            extracted_triples: vec![],
        }
    }

    #[test]
    fn test_save_load_and_idx_repair() {
        let dir = tempfile::tempdir().unwrap();
        let cache = OpenIeCache::new(dir.path(), "test_llm");

        let mut results = OpenIeResults {
            docs: vec![doc("Paris is the capital of France.", &["Paris", "France"])],
            ..Default::default()
        };
        // corrupt the idx before saving; load must repair it
        results.docs[0].idx = "chunk-stale".to_string();
        cache.save(&mut results).unwrap();

        let loaded = cache.load().unwrap();
        assert_eq!(loaded.docs.len(), 1);
        assert_eq!(
            loaded.docs[0].idx,
            chunk_hash_id("Paris is the capital of France.")
        );
    }

    #[test]
    fn test_stats() {
        let mut results = OpenIeResults {
            docs: vec![doc("x", &["Paris", "New York"])],
            ..Default::default()
        };
        results.recompute_stats();
        // "Paris" = 5 chars 1 word, "New York" = 8 chars 2 words
        assert!((results.avg_ent_chars - 6.5).abs() < 1e-9);
        assert!((results.avg_ent_words - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_partition() {
        let results = OpenIeResults {
            docs: vec![doc("one", &[]), doc("two", &[])],
            ..Default::default()
        };
        let ids = vec![
            chunk_hash_id("one"),
            chunk_hash_id("three"),
        ];
        let (cached, missing) = OpenIeCache::partition(&results, &ids);
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].passage, "one");
        assert_eq!(missing, vec![chunk_hash_id("three")]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = OpenIeCache::new(dir.path(), "none");
        let loaded = cache.load().unwrap();
        assert!(loaded.docs.is_empty());
    }
}
