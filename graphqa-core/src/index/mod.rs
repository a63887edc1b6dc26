//! Indexing: chunk insert → OpenIE → graph edges → synonymy edges → persist.
//!
//! Incremental and re-entrant: chunks already present in the graph are
//! skipped by the edge-building branches, so re-indexing an overlapping
//! corpus never double-counts co-occurrence weights.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};

use crate::core::{chunk_hash_id, entity_hash_id, fact_hash_id, GraphQaError, Result, Triple};
use crate::graph::VertexBatch;
use crate::storage::openie_cache::{OpenIeCache, OpenIeDoc, OpenIeResults};
use crate::text::{filter_invalid_triples, process_triple};
use crate::GraphQa;

/// Per-chunk extraction after filtering and text processing
struct ChunkExtraction {
    chunk_id: String,
    triples: Vec<Triple>,
    entities: IndexSet<String>,
}

impl GraphQa {
    /// Index a batch of passages.
    ///
    /// Already-present chunks are no-ops for the stores and the edge builder;
    /// OpenIE results are cached on disk, so re-indexing a chunk skips
    /// extraction unless `force_openie_from_scratch` is set.
    pub fn index(&mut self, docs: &[String]) -> Result<()> {
        tracing::info!(docs = docs.len(), "indexing corpus");

        let chunk_ids = self
            .chunk_store
            .insert(docs, self.embedder.as_ref(), None)?;
        let distinct_ids: Vec<String> = {
            let mut seen = HashSet::new();
            chunk_ids
                .iter()
                .filter(|id| seen.insert((*id).clone()))
                .cloned()
                .collect()
        };

        let mut cache = if self.config.indexing.force_openie_from_scratch {
            OpenIeResults::default()
        } else {
            self.openie_cache.load()?
        };
        let (_, to_extract) = OpenIeCache::partition(&cache, &distinct_ids);
        if !to_extract.is_empty() {
            if !self.config.indexing.openie_mode.extracts_inline() {
                return Err(GraphQaError::Config {
                    message: format!(
                        "openie mode is offline and {} chunks lack cached extractions; \
                         run pre_openie over the corpus first",
                        to_extract.len()
                    ),
                });
            }
            self.extract_and_cache(&mut cache, &to_extract)?;
        }

        let extractions = self.reformat_extractions(&cache, &distinct_ids)?;
        self.insert_entities_and_facts(&extractions)?;

        // Build the edge map, then materialize vertices and edges.
        let mut edge_weights: IndexMap<(String, String), f64> = IndexMap::new();
        let mut new_chunks: Vec<&ChunkExtraction> = Vec::new();
        for extraction in &extractions {
            if self.graph.has_vertex(&extraction.chunk_id) {
                continue;
            }
            new_chunks.push(extraction);
            add_fact_edges(&mut edge_weights, extraction);
            add_passage_edges(&mut edge_weights, extraction);
        }
        let new_entity_count = self.add_synonymy_edges(&mut edge_weights)?;

        self.add_new_vertices(&extractions)?;
        let pairs: Vec<(String, String)> = edge_weights.keys().cloned().collect();
        let weights: Vec<f64> = edge_weights.values().copied().collect();
        self.graph.add_edges(&pairs, &weights)?;
        self.graph.save(&self.graph_path())?;

        tracing::info!(
            new_chunks = new_chunks.len(),
            new_entities = new_entity_count,
            edges = pairs.len(),
            vertices = self.graph.vcount(),
            "index pass complete"
        );
        self.retrieval = None;
        Ok(())
    }

    /// Populate the OpenIE cache for `docs` without touching the stores or
    /// the graph. This is the priming pass that offline modes require before
    /// `index`.
    pub fn pre_openie(&mut self, docs: &[String]) -> Result<()> {
        let chunk_ids: Vec<String> = docs.iter().map(|d| chunk_hash_id(d)).collect();
        let mut cache = if self.config.indexing.force_openie_from_scratch {
            OpenIeResults::default()
        } else {
            self.openie_cache.load()?
        };
        let (_, to_extract) = OpenIeCache::partition(&cache, &chunk_ids);
        if to_extract.is_empty() {
            tracing::info!("openie cache already covers the corpus");
            return Ok(());
        }
        let by_id: HashMap<&str, &String> = chunk_ids
            .iter()
            .map(|id| id.as_str())
            .zip(docs.iter())
            .collect();
        let batch: IndexMap<String, String> = to_extract
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|d| (id.clone(), (*d).clone())))
            .collect();
        let (ner, triples) = self.openie.batch_openie(&batch)?;
        for (chunk_id, passage) in &batch {
            cache.docs.push(OpenIeDoc {
                idx: chunk_id.clone(),
                passage: passage.clone(),
                extracted_entities: ner
                    .get(chunk_id)
                    .map(|n| n.unique_entities.clone())
                    .unwrap_or_default(),
                extracted_triples: triples
                    .get(chunk_id)
                    .map(|t| t.triples.clone())
                    .unwrap_or_default(),
            });
        }
        self.openie_cache.save(&mut cache)?;
        tracing::info!(extracted = batch.len(), "pre-openie pass complete");
        Ok(())
    }

    /// Delete passages and everything only they support.
    ///
    /// A fact or entity survives as long as at least one non-deleted chunk
    /// still references it; liveness is computed from the OpenIE cache before
    /// any rows are removed.
    pub fn delete(&mut self, docs: &[String]) -> Result<()> {
        self.prepare_retrieval()?;

        let chunk_ids: Vec<String> = docs
            .iter()
            .map(|d| chunk_hash_id(d))
            .filter(|id| self.chunk_store.contains(id))
            .collect();
        if chunk_ids.is_empty() {
            tracing::warn!("delete matched no stored chunks");
            return Ok(());
        }
        let delete_set: HashSet<&str> = chunk_ids.iter().map(|s| s.as_str()).collect();

        let cache = self.openie_cache.load()?;
        let mut fact_to_chunks: HashMap<String, HashSet<String>> = HashMap::new();
        let mut entity_to_chunks: HashMap<String, HashSet<String>> = HashMap::new();
        for doc in &cache.docs {
            for triple in filter_invalid_triples(&doc.extracted_triples) {
                let processed = process_triple(&triple);
                fact_to_chunks
                    .entry(fact_hash_id(&processed))
                    .or_default()
                    .insert(doc.idx.clone());
                for slot in [processed.subject(), processed.object()] {
                    entity_to_chunks
                        .entry(entity_hash_id(slot))
                        .or_default()
                        .insert(doc.idx.clone());
                }
            }
        }
        let removable = |map: &HashMap<String, HashSet<String>>| -> Vec<String> {
            map.iter()
                .filter(|(_, chunks)| chunks.iter().all(|c| delete_set.contains(c.as_str())))
                .map(|(id, _)| id.clone())
                .collect()
        };
        let removable_facts = removable(&fact_to_chunks);
        let removable_entities = removable(&entity_to_chunks);

        let mut kept = OpenIeResults {
            docs: cache
                .docs
                .into_iter()
                .filter(|d| !delete_set.contains(d.idx.as_str()))
                .collect(),
            ..Default::default()
        };
        self.openie_cache.save(&mut kept)?;

        self.chunk_store.delete(&chunk_ids)?;
        self.fact_store.delete(&removable_facts)?;
        self.entity_store.delete(&removable_entities)?;

        let mut doomed = chunk_ids.clone();
        doomed.extend(removable_entities.iter().cloned());
        self.graph.delete_vertices(&doomed);
        self.graph.save(&self.graph_path())?;

        tracing::info!(
            chunks = chunk_ids.len(),
            facts = removable_facts.len(),
            entities = removable_entities.len(),
            "delete pass complete"
        );
        self.retrieval = None;
        Ok(())
    }

    fn extract_and_cache(&mut self, cache: &mut OpenIeResults, to_extract: &[String]) -> Result<()> {
        let batch: IndexMap<String, String> = to_extract
            .iter()
            .filter_map(|id| {
                self.chunk_store
                    .row(id)
                    .map(|text| (id.clone(), text.to_string()))
            })
            .collect();
        tracing::info!(chunks = batch.len(), "running openie extraction");
        let (ner, triples) = self.openie.batch_openie(&batch)?;
        for (chunk_id, passage) in &batch {
            cache.docs.push(OpenIeDoc {
                idx: chunk_id.clone(),
                passage: passage.clone(),
                extracted_entities: ner
                    .get(chunk_id)
                    .map(|n| n.unique_entities.clone())
                    .unwrap_or_default(),
                extracted_triples: triples
                    .get(chunk_id)
                    .map(|t| t.triples.clone())
                    .unwrap_or_default(),
            });
        }
        self.openie_cache.save(cache)
    }

    /// Filter and process the cached extractions for the chunks being
    /// indexed. Every chunk must have an extraction entry; a gap means the
    /// cache and the store disagree.
    fn reformat_extractions(
        &self,
        cache: &OpenIeResults,
        chunk_ids: &[String],
    ) -> Result<Vec<ChunkExtraction>> {
        let by_id: HashMap<&str, &OpenIeDoc> =
            cache.docs.iter().map(|d| (d.idx.as_str(), d)).collect();
        let mut extractions = Vec::with_capacity(chunk_ids.len());
        for chunk_id in chunk_ids {
            let doc = by_id
                .get(chunk_id.as_str())
                .ok_or_else(|| GraphQaError::Invariant {
                    message: format!("chunk {chunk_id} has no OpenIE extraction after merge"),
                })?;
            let mut triples = Vec::new();
            let mut entities = IndexSet::new();
            for triple in filter_invalid_triples(&doc.extracted_triples) {
                let processed = process_triple(&triple);
                entities.insert(processed.subject().to_string());
                entities.insert(processed.object().to_string());
                triples.push(processed);
            }
            extractions.push(ChunkExtraction {
                chunk_id: chunk_id.clone(),
                triples,
                entities,
            });
        }
        Ok(extractions)
    }

    fn insert_entities_and_facts(&mut self, extractions: &[ChunkExtraction]) -> Result<()> {
        let mut entity_strings: IndexSet<String> = IndexSet::new();
        let mut fact_strings: IndexSet<String> = IndexSet::new();
        for extraction in extractions {
            for entity in &extraction.entities {
                entity_strings.insert(entity.clone());
            }
            for triple in &extraction.triples {
                fact_strings.insert(triple.stringify());
            }
        }
        let entity_vec: Vec<String> = entity_strings.into_iter().collect();
        let fact_vec: Vec<String> = fact_strings.into_iter().collect();
        self.entity_store
            .insert(&entity_vec, self.embedder.as_ref(), None)?;
        self.fact_store
            .insert(&fact_vec, self.embedder.as_ref(), None)?;
        Ok(())
    }

    /// Synonymy edges via exact nearest neighbors over the entity embedding
    /// space. Queries are restricted to entities not yet in the graph so
    /// re-indexing never duplicates existing similarity edges; neighbors come
    /// from the whole store. Returns the number of new entities considered.
    fn add_synonymy_edges(
        &self,
        edge_weights: &mut IndexMap<(String, String), f64>,
    ) -> Result<usize> {
        let top_k = self.config.indexing.synonymy_edge_topk;
        let threshold = self.config.indexing.synonymy_edge_sim_threshold;
        let all_ids = self.entity_store.all_ids();
        let all_texts = self.entity_store.all_texts();
        let matrix = self.entity_store.embedding_matrix();

        let mut new_count = 0usize;
        for (q, query_id) in all_ids.iter().enumerate() {
            if self.graph.has_vertex(query_id) {
                continue;
            }
            new_count += 1;
            let alnum_len = all_texts[q]
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .count();
            if alnum_len <= 2 {
                continue;
            }
            let query_vec = &matrix[q];
            let mut scored: Vec<(usize, f64)> = matrix
                .iter()
                .enumerate()
                .filter(|(i, candidate)| *i != q && candidate.len() == query_vec.len())
                .map(|(i, candidate)| {
                    let dot: f64 = query_vec.iter().zip(candidate.iter()).map(|(a, b)| a * b).sum();
                    (i, dot)
                })
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            for (neighbor, similarity) in scored.into_iter().take(top_k) {
                if similarity < threshold {
                    break;
                }
                if all_texts[neighbor].is_empty() {
                    continue;
                }
                edge_weights.insert((query_id.clone(), all_ids[neighbor].clone()), similarity);
            }
        }
        Ok(new_count)
    }

    fn add_new_vertices(&mut self, extractions: &[ChunkExtraction]) -> Result<()> {
        let mut batch = VertexBatch::default();
        let mut queued: HashSet<String> = HashSet::new();
        for extraction in extractions {
            if !self.graph.has_vertex(&extraction.chunk_id) && queued.insert(extraction.chunk_id.clone())
            {
                let content = self
                    .chunk_store
                    .row(&extraction.chunk_id)
                    .unwrap_or_default()
                    .to_string();
                batch.names.push(extraction.chunk_id.clone());
                batch.contents.push(content);
            }
            for entity in &extraction.entities {
                let entity_id = entity_hash_id(entity);
                if !self.entity_store.contains(&entity_id) {
                    // blank entity strings never made it into the store
                    continue;
                }
                if !self.graph.has_vertex(&entity_id) && queued.insert(entity_id.clone()) {
                    batch.names.push(entity_id);
                    batch.contents.push(entity.clone());
                }
            }
        }
        if !batch.names.is_empty() {
            self.graph.add_vertices(batch)?;
        }
        Ok(())
    }
}

/// Triple edges: each occurrence of a well-formed triple in a new chunk adds
/// 1 to the co-occurrence weight in both directions.
fn add_fact_edges(edge_weights: &mut IndexMap<(String, String), f64>, chunk: &ChunkExtraction) {
    for triple in &chunk.triples {
        let subject_id = entity_hash_id(triple.subject());
        let object_id = entity_hash_id(triple.object());
        if subject_id == object_id {
            continue;
        }
        *edge_weights
            .entry((subject_id.clone(), object_id.clone()))
            .or_insert(0.0) += 1.0;
        *edge_weights.entry((object_id, subject_id)).or_insert(0.0) += 1.0;
    }
}

/// Passage edges: chunk → every entity mentioned in its triples, weight 1.
fn add_passage_edges(edge_weights: &mut IndexMap<(String, String), f64>, chunk: &ChunkExtraction) {
    for entity in &chunk.entities {
        let entity_id = entity_hash_id(entity);
        edge_weights.insert((chunk.chunk_id.clone(), entity_id), 1.0);
    }
}
