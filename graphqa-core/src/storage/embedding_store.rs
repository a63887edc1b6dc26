//! Namespaced persistent embedding store.
//!
//! One store file per namespace (`vdb_chunk.json`, `vdb_entity.json`,
//! `vdb_fact.json`) backing the mapping `hash_id → (content, vector)` and the
//! reverse `content → hash_id`. Rows keep insertion order; they are appended
//! on insert and never mutated in place. Deletes remove rows and rewrite the
//! whole file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::traits::Embedder;
use crate::core::{content_hash, GraphQaError, Result};
use crate::storage::write_json_atomic;

/// On-disk layout: three parallel columns in row order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(rename = "hashIds")]
    hash_ids: Vec<String>,
    texts: Vec<String>,
    embeddings: Vec<Vec<f64>>,
}

/// Ordered persistent map `hash_id → (text, vector)` for one namespace.
pub struct EmbeddingStore {
    namespace: String,
    prefix: String,
    path: PathBuf,
    hash_ids: Vec<String>,
    texts: Vec<String>,
    embeddings: Vec<Vec<f64>>,
    id_to_row: HashMap<String, usize>,
    text_to_id: HashMap<String, String>,
}

impl EmbeddingStore {
    /// Open (or create) the store for `namespace` under `dir`; the file is
    /// `vdb_<namespace>.json` and ids carry the prefix `<namespace>-`.
    pub fn open(dir: &Path, namespace: &str) -> Result<Self> {
        let path = dir.join(format!("vdb_{namespace}.json"));
        let mut store = Self {
            namespace: namespace.to_string(),
            prefix: format!("{namespace}-"),
            path,
            hash_ids: Vec::new(),
            texts: Vec::new(),
            embeddings: Vec::new(),
            id_to_row: HashMap::new(),
            text_to_id: HashMap::new(),
        };
        if store.path.exists() {
            let raw = std::fs::read_to_string(&store.path)?;
            let file: StoreFile = serde_json::from_str(&raw)?;
            if file.hash_ids.len() != file.texts.len()
                || file.hash_ids.len() != file.embeddings.len()
            {
                return Err(GraphQaError::Invariant {
                    message: format!(
                        "store {} has misaligned columns: {} ids, {} texts, {} embeddings",
                        store.path.display(),
                        file.hash_ids.len(),
                        file.texts.len(),
                        file.embeddings.len()
                    ),
                });
            }
            store.hash_ids = file.hash_ids;
            store.texts = file.texts;
            store.embeddings = file.embeddings;
            store.rebuild_indexes();
        }
        Ok(store)
    }

    /// Namespace of this store
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Content-addressed id for `text` in this namespace
    pub fn hash_of(&self, text: &str) -> String {
        content_hash(text, &self.prefix)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.hash_ids.len()
    }

    /// Whether the store has no rows
    pub fn is_empty(&self) -> bool {
        self.hash_ids.is_empty()
    }

    /// Whether a row with this id exists
    pub fn contains(&self, hash_id: &str) -> bool {
        self.id_to_row.contains_key(hash_id)
    }

    /// All ids in insertion order
    pub fn all_ids(&self) -> Vec<String> {
        self.hash_ids.clone()
    }

    /// All texts in insertion order
    pub fn all_texts(&self) -> Vec<String> {
        self.texts.clone()
    }

    /// Text of a row by id
    pub fn row(&self, hash_id: &str) -> Option<&str> {
        self.id_to_row
            .get(hash_id)
            .map(|&i| self.texts[i].as_str())
    }

    /// Texts for a batch of ids; unknown ids yield `None`
    pub fn rows(&self, hash_ids: &[String]) -> Vec<Option<String>> {
        hash_ids
            .iter()
            .map(|id| self.row(id).map(|t| t.to_string()))
            .collect()
    }

    /// Id previously assigned to `text`, if stored
    pub fn id_of_text(&self, text: &str) -> Option<&str> {
        self.text_to_id.get(text).map(|s| s.as_str())
    }

    /// Embedding of a row by id
    pub fn embedding(&self, hash_id: &str) -> Option<&[f64]> {
        self.id_to_row
            .get(hash_id)
            .map(|&i| self.embeddings[i].as_slice())
    }

    /// Embeddings for a batch of ids; every id must exist
    pub fn embeddings(&self, hash_ids: &[String]) -> Result<Vec<Vec<f64>>> {
        hash_ids
            .iter()
            .map(|id| {
                self.embedding(id)
                    .map(|e| e.to_vec())
                    .ok_or_else(|| GraphQaError::NotFound {
                        resource: format!("{} embedding", self.namespace),
                        id: id.clone(),
                    })
            })
            .collect()
    }

    /// Embedding matrix in row order
    pub fn embedding_matrix(&self) -> &[Vec<f64>] {
        &self.embeddings
    }

    /// Among `texts`, the ones whose hash is not yet stored, as an ordered
    /// map `hash_id → text`. Duplicate content within the batch collapses to
    /// one entry (last writer wins; hashes are deterministic on content, so
    /// collapsed entries are identical).
    pub fn missing(&self, texts: &[String]) -> IndexMap<String, String> {
        let mut missing = IndexMap::new();
        for text in texts {
            let id = self.hash_of(text);
            if !self.contains(&id) {
                missing.insert(id, text.clone());
            }
        }
        missing
    }

    /// Insert texts: hash, encode only the truly-missing ones in one batch,
    /// append in the order the encoder returned, persist.
    ///
    /// Blank texts are dropped with a warning. Returns the hash ids of the
    /// surviving input texts in input order. A count mismatch from the
    /// embedding client is fatal; storing misaligned rows would corrupt
    /// every downstream matrix.
    pub fn insert(
        &mut self,
        texts: &[String],
        embedder: &dyn Embedder,
        instruction: Option<&str>,
    ) -> Result<Vec<String>> {
        let non_blank: Vec<String> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect();
        let blank_count = texts.len() - non_blank.len();
        if blank_count > 0 {
            tracing::warn!(
                namespace = %self.namespace,
                blank_count,
                "dropping blank texts before insert"
            );
        }

        let missing = self.missing(&non_blank);
        if !missing.is_empty() {
            let to_encode: Vec<String> = missing.values().cloned().collect();
            let vectors = embedder.batch_encode(&to_encode, instruction, true)?;
            if vectors.len() != missing.len() {
                return Err(GraphQaError::Invariant {
                    message: format!(
                        "embedding client returned {} vectors for {} texts in namespace {}",
                        vectors.len(),
                        missing.len(),
                        self.namespace
                    ),
                });
            }
            for ((hash_id, text), vector) in missing.into_iter().zip(vectors.into_iter()) {
                self.hash_ids.push(hash_id);
                self.texts.push(text);
                self.embeddings.push(vector);
            }
            self.rebuild_indexes();
            self.persist()?;
        }

        Ok(non_blank.iter().map(|t| self.hash_of(t)).collect())
    }

    /// Delete rows by id. Unknown ids are ignored with a warning. Removal
    /// runs in descending row order so earlier indices stay valid.
    pub fn delete(&mut self, hash_ids: &[String]) -> Result<()> {
        let mut rows: Vec<usize> = Vec::new();
        for id in hash_ids {
            match self.id_to_row.get(id) {
                Some(&row) => rows.push(row),
                None => {
                    tracing::warn!(namespace = %self.namespace, id = %id, "delete of unknown id skipped");
                },
            }
        }
        if rows.is_empty() {
            return Ok(());
        }
        rows.sort_unstable();
        rows.dedup();
        for &row in rows.iter().rev() {
            self.hash_ids.remove(row);
            self.texts.remove(row);
            self.embeddings.remove(row);
        }
        self.rebuild_indexes();
        self.persist()
    }

    fn rebuild_indexes(&mut self) {
        self.id_to_row.clear();
        self.text_to_id.clear();
        for (row, (id, text)) in self.hash_ids.iter().zip(self.texts.iter()).enumerate() {
            self.id_to_row.insert(id.clone(), row);
            self.text_to_id.insert(text.clone(), id.clone());
        }
    }

    fn persist(&self) -> Result<()> {
        let file = StoreFile {
            hash_ids: self.hash_ids.clone(),
            texts: self.texts.clone(),
            embeddings: self.embeddings.clone(),
        };
        write_json_atomic(&self.path, &file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_providers::MockEmbedder;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EmbeddingStore::open(dir.path(), "chunk").unwrap();
        let embedder = MockEmbedder::new(8);

        let ids = store
            .insert(&texts(&["alpha", "beta"]), &embedder, None)
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.row(&ids[0]), Some("alpha"));
        assert_eq!(store.id_of_text("beta"), Some(ids[1].as_str()));
        assert_eq!(store.embedding(&ids[0]).unwrap().len(), 8);
    }

    #[test]
    fn test_idempotent_insert() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EmbeddingStore::open(dir.path(), "chunk").unwrap();
        let embedder = MockEmbedder::new(4);

        store.insert(&texts(&["same"]), &embedder, None).unwrap();
        store.insert(&texts(&["same"]), &embedder, None).unwrap();
        assert_eq!(store.len(), 1);

        // duplicates inside one batch collapse too
        store
            .insert(&texts(&["dup", "dup"]), &embedder, None)
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_blank_texts_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EmbeddingStore::open(dir.path(), "entity").unwrap();
        let embedder = MockEmbedder::new(4);
        let ids = store
            .insert(&texts(&["", "  ", "kept"]), &embedder, None)
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reopen_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = MockEmbedder::new(4);
        let (ids, all_texts, matrix) = {
            let mut store = EmbeddingStore::open(dir.path(), "fact").unwrap();
            store
                .insert(&texts(&["one", "two", "three"]), &embedder, None)
                .unwrap();
            (
                store.all_ids(),
                store.all_texts(),
                store.embedding_matrix().to_vec(),
            )
        };
        let reopened = EmbeddingStore::open(dir.path(), "fact").unwrap();
        assert_eq!(reopened.all_ids(), ids);
        assert_eq!(reopened.all_texts(), all_texts);
        assert_eq!(reopened.embedding_matrix(), matrix.as_slice());
    }

    #[test]
    fn test_delete_descending_and_unknown_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EmbeddingStore::open(dir.path(), "chunk").unwrap();
        let embedder = MockEmbedder::new(4);
        let ids = store
            .insert(&texts(&["a", "b", "c"]), &embedder, None)
            .unwrap();

        store
            .delete(&[ids[0].clone(), ids[2].clone(), "chunk-unknown".to_string()])
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.all_texts(), vec!["b".to_string()]);

        let reopened = EmbeddingStore::open(dir.path(), "chunk").unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_count_mismatch_is_fatal() {
        struct BrokenEmbedder;
        impl Embedder for BrokenEmbedder {
            fn batch_encode(
                &self,
                _texts: &[String],
                _instruction: Option<&str>,
                _norm: bool,
            ) -> Result<Vec<Vec<f64>>> {
                Ok(vec![vec![0.0; 4]])
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let mut store = EmbeddingStore::open(dir.path(), "chunk").unwrap();
        let err = store
            .insert(&texts(&["a", "b"]), &BrokenEmbedder, None)
            .unwrap_err();
        assert!(matches!(err, GraphQaError::Invariant { .. }));
    }
}
