//! Hybrid retrieval: dense passage scores fused with personalized PageRank
//! seeded from query-linked facts.
//!
//! Two public paths share the same machinery: [`GraphQa::retrieve_dpr`] is
//! pure dense retrieval, [`GraphQa::retrieve`] adds fact scoring, LLM
//! reranking, and graph search. Retrieval caches are snapshotted lazily and
//! invalidated by `index`/`delete`.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::core::{entity_hash_id, GraphQaError, QuerySolution, Result, Triple};
use crate::text::{argsort_descending, filter_invalid_triples, min_max_normalize, process_triple};
use crate::GraphQa;

/// Instruction prepended to queries when scoring facts
pub const QUERY_TO_FACT_INSTRUCTION: &str =
    "Given a question, retrieve relevant triplet facts that matter to the question.";

/// Instruction prepended to queries when scoring passages
pub const QUERY_TO_PASSAGE_INSTRUCTION: &str =
    "Given a question, retrieve relevant documents that best answer the question.";

/// Snapshot of everything retrieval needs, rebuilt after any mutation.
pub(crate) struct RetrievalState {
    pub entity_node_keys: Vec<String>,
    pub passage_node_keys: Vec<String>,
    pub fact_node_keys: Vec<String>,
    pub entity_embeddings: Vec<Vec<f64>>,
    pub passage_embeddings: Vec<Vec<f64>>,
    pub fact_embeddings: Vec<Vec<f64>>,
    /// Graph vertex index by name, for chunk and entity nodes
    pub vertex_index: HashMap<String, usize>,
    /// Entity id → chunk ids referencing it, rebuilt from the OpenIE cache
    pub entity_to_chunks: HashMap<String, HashSet<String>>,
}

/// Both query encodings, cached per query text
#[derive(Debug, Clone)]
pub(crate) struct QueryEmbeddings {
    pub fact: Vec<f64>,
    pub passage: Vec<f64>,
}

impl GraphQa {
    /// Rebuild the retrieval caches when missing or stale. Staleness is
    /// detected by the vertex count drifting from `|chunks| + |entities|`,
    /// which covers both mutations in this session and state loaded from
    /// disk.
    pub(crate) fn prepare_retrieval(&mut self) -> Result<()> {
        if self.retrieval.is_some()
            && self.graph.vcount() == self.chunk_store.len() + self.entity_store.len()
        {
            return Ok(());
        }
        tracing::info!("rebuilding retrieval caches");

        let mut vertex_index = HashMap::new();
        for name in self.graph.vertex_names() {
            if let Some(idx) = self.graph.vertex_index(&name) {
                vertex_index.insert(name, idx);
            }
        }

        // entity_to_chunks comes back from the OpenIE cache; this is what
        // lets delete run without the raw triple data in memory.
        let mut entity_to_chunks: HashMap<String, HashSet<String>> = HashMap::new();
        let cache = self.openie_cache.load()?;
        for doc in &cache.docs {
            if !self.chunk_store.contains(&doc.idx) {
                continue;
            }
            for triple in filter_invalid_triples(&doc.extracted_triples) {
                let processed = process_triple(&triple);
                for slot in [processed.subject(), processed.object()] {
                    entity_to_chunks
                        .entry(entity_hash_id(slot))
                        .or_default()
                        .insert(doc.idx.clone());
                }
            }
        }

        self.retrieval = Some(RetrievalState {
            entity_node_keys: self.entity_store.all_ids(),
            passage_node_keys: self.chunk_store.all_ids(),
            fact_node_keys: self.fact_store.all_ids(),
            entity_embeddings: self.entity_store.embedding_matrix().to_vec(),
            passage_embeddings: self.chunk_store.embedding_matrix().to_vec(),
            fact_embeddings: self.fact_store.embedding_matrix().to_vec(),
            vertex_index,
            entity_to_chunks,
        });
        Ok(())
    }

    /// Encode a query with both instruction strings, caching by query text.
    pub(crate) fn query_embeddings(&mut self, query: &str) -> Result<QueryEmbeddings> {
        if let Some(cached) = self.query_cache.get(query) {
            return Ok(cached.clone());
        }
        let texts = vec![query.to_string()];
        let fact = self
            .embedder
            .batch_encode(&texts, Some(QUERY_TO_FACT_INSTRUCTION), true)?
            .pop()
            .ok_or_else(|| GraphQaError::Embedding {
                message: "empty embedding batch for query".to_string(),
            })?;
        let passage = self
            .embedder
            .batch_encode(&texts, Some(QUERY_TO_PASSAGE_INSTRUCTION), true)?
            .pop()
            .ok_or_else(|| GraphQaError::Embedding {
                message: "empty embedding batch for query".to_string(),
            })?;
        let embeddings = QueryEmbeddings { fact, passage };
        self.query_cache.put(query.to_string(), embeddings.clone());
        Ok(embeddings)
    }

    /// Dense passage retrieval for a batch of queries.
    pub fn retrieve_dpr(&mut self, queries: &[String], k: usize) -> Result<Vec<QuerySolution>> {
        self.prepare_retrieval()?;
        let embedded: Vec<QueryEmbeddings> = queries
            .iter()
            .map(|q| self.query_embeddings(q))
            .collect::<Result<_>>()?;

        let state = self.retrieval.as_ref().expect("retrieval state prepared");
        let mut solutions = Vec::with_capacity(queries.len());
        for (query, embeddings) in queries.iter().zip(embedded.iter()) {
            let (order, scores) = dense_passage_scores(state, &embeddings.passage);
            solutions.push(self.assemble_solution(state, query, &order, &scores, k));
        }
        Ok(solutions)
    }

    /// Graph-aware hybrid retrieval for a batch of queries.
    pub fn retrieve(&mut self, queries: &[String], k: usize) -> Result<Vec<QuerySolution>> {
        self.prepare_retrieval()?;
        let embedded: Vec<QueryEmbeddings> = queries
            .iter()
            .map(|q| self.query_embeddings(q))
            .collect::<Result<_>>()?;

        let link_top_k = self.config.retrieval.linking_top_k;
        let total_start = Instant::now();
        let mut rerank_time = Duration::ZERO;
        let mut ppr_time = Duration::ZERO;

        let state = self.retrieval.as_ref().expect("retrieval state prepared");
        let mut solutions = Vec::with_capacity(queries.len());
        for (query, embeddings) in queries.iter().zip(embedded.iter()) {
            let fact_scores = fact_scores(state, &embeddings.fact);
            if fact_scores.is_empty() {
                tracing::warn!(query = %query, "no scorable facts, falling back to dense retrieval");
                let (order, scores) = dense_passage_scores(state, &embeddings.passage);
                solutions.push(self.assemble_solution(state, query, &order, &scores, k));
                continue;
            }

            // candidates and their global indices stay aligned even if a
            // fact row fails to parse back into a triple
            let mut candidates: Vec<Triple> = Vec::new();
            let mut candidate_indices: Vec<usize> = Vec::new();
            for idx in argsort_descending(&fact_scores).into_iter().take(link_top_k) {
                let key = &state.fact_node_keys[idx];
                match self.fact_store.row(key).and_then(Triple::parse) {
                    Some(triple) => {
                        candidates.push(triple);
                        candidate_indices.push(idx);
                    },
                    None => tracing::warn!(key = %key, "fact row is not a parseable triple"),
                }
            }

            let rerank_start = Instant::now();
            let (top_fact_indices, top_facts, rerank_log) = self.reranker.rerank(
                &self.prompts,
                query,
                &candidates,
                &candidate_indices,
                link_top_k,
            );
            rerank_time += rerank_start.elapsed();
            if let Some(error) = &rerank_log.error {
                tracing::warn!(query = %query, error = %error, "fact reranker degraded to original order");
            }

            if top_facts.is_empty() {
                tracing::info!(query = %query, "reranker kept no facts, falling back to dense retrieval");
                let (order, scores) = dense_passage_scores(state, &embeddings.passage);
                solutions.push(self.assemble_solution(state, query, &order, &scores, k));
                continue;
            }

            let ppr_start = Instant::now();
            let (order, scores) = self.graph_search_with_fact_entities(
                state,
                link_top_k,
                &embeddings.passage,
                &fact_scores,
                &top_fact_indices,
                &top_facts,
            )?;
            ppr_time += ppr_start.elapsed();

            solutions.push(self.assemble_solution(state, query, &order, &scores, k));
        }

        tracing::info!(
            queries = queries.len(),
            rerank_ms = rerank_time.as_millis() as u64,
            ppr_ms = ppr_time.as_millis() as u64,
            total_ms = total_start.elapsed().as_millis() as u64,
            "retrieve complete"
        );
        Ok(solutions)
    }

    /// Fuse fact-derived phrase weights with scaled dense passage scores into
    /// a PPR reset distribution, run PageRank, and rank passages by their
    /// PPR mass.
    fn graph_search_with_fact_entities(
        &self,
        state: &RetrievalState,
        link_top_k: usize,
        query_passage_embedding: &[f64],
        fact_scores: &[f64],
        top_fact_indices: &[usize],
        top_facts: &[Triple],
    ) -> Result<(Vec<usize>, Vec<f64>)> {
        let n = self.graph.vcount();
        let mut phrase_weights = vec![0.0; n];
        let mut passage_weights = vec![0.0; n];
        let mut counts = vec![0usize; n];
        // phrase key → vertex id, insertion-ordered so the top-k filter has
        // no iteration-order dependence
        let mut encountered: IndexMap<String, usize> = IndexMap::new();

        for (rank, fact) in top_facts.iter().enumerate() {
            let score = top_fact_indices
                .get(rank)
                .and_then(|&idx| fact_scores.get(idx))
                .copied()
                .unwrap_or(0.0);
            for slot in [fact.subject(), fact.object()] {
                let phrase = slot.to_lowercase();
                let phrase_key = entity_hash_id(&phrase);
                let Some(&vertex) = state.vertex_index.get(&phrase_key) else {
                    tracing::warn!(phrase = %phrase, "fact phrase missing from graph, skipped");
                    continue;
                };
                let doc_count = state
                    .entity_to_chunks
                    .get(&phrase_key)
                    .map(|chunks| chunks.len())
                    .unwrap_or(0);
                phrase_weights[vertex] += score / doc_count.max(1) as f64;
                counts[vertex] += 1;
                encountered.insert(phrase_key, vertex);
            }
        }
        for (weight, &count) in phrase_weights.iter_mut().zip(counts.iter()) {
            if count > 0 {
                *weight /= count as f64;
            }
        }

        if link_top_k > 0 && encountered.len() > link_top_k {
            let mut ranked: Vec<(&String, f64)> = encountered
                .iter()
                .map(|(key, &vertex)| (key, phrase_weights[vertex]))
                .collect();
            // min–max normalization produces tied weights routinely; break
            // ties on the phrase key so the cutoff is stable across runs
            ranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(b.0))
            });
            let kept: HashSet<&String> = ranked.iter().take(link_top_k).map(|(key, _)| *key).collect();
            for (key, &vertex) in &encountered {
                if !kept.contains(key) {
                    phrase_weights[vertex] = 0.0;
                }
            }
        }

        let (dpr_order, dpr_scores) = dense_passage_scores(state, query_passage_embedding);
        let dpr_scores = min_max_normalize(&dpr_scores);
        for (rank, &passage_idx) in dpr_order.iter().enumerate() {
            let key = &state.passage_node_keys[passage_idx];
            let Some(&vertex) = state.vertex_index.get(key) else {
                tracing::warn!(key = %key, "passage missing from graph, skipped");
                continue;
            };
            passage_weights[vertex] =
                dpr_scores[rank] * self.config.retrieval.passage_node_weight;
        }

        let reset: Vec<f64> = phrase_weights
            .iter()
            .zip(passage_weights.iter())
            .map(|(&p, &d)| p + d)
            .collect();
        if reset.iter().sum::<f64>() <= 0.0 {
            tracing::warn!("empty PPR reset distribution, returning dense ranking");
            return Ok((dpr_order, dpr_scores));
        }

        let ppr = self
            .graph
            .personalized_page_rank(&reset, self.config.retrieval.damping)?;

        let passage_scores: Vec<f64> = state
            .passage_node_keys
            .iter()
            .map(|key| {
                state
                    .vertex_index
                    .get(key)
                    .map(|&vertex| ppr[vertex])
                    .unwrap_or(0.0)
            })
            .collect();
        let order = argsort_descending(&passage_scores);
        let sorted: Vec<f64> = order.iter().map(|&i| passage_scores[i]).collect();
        Ok((order, sorted))
    }

    /// Turn ranked passage-space indices into passage texts, bounded by `k`.
    fn assemble_solution(
        &self,
        state: &RetrievalState,
        query: &str,
        order: &[usize],
        scores: &[f64],
        k: usize,
    ) -> QuerySolution {
        let mut docs = Vec::with_capacity(k.min(order.len()));
        let mut doc_scores = Vec::with_capacity(k.min(order.len()));
        for (rank, &passage_idx) in order.iter().enumerate() {
            if docs.len() == k {
                break;
            }
            let Some(key) = state.passage_node_keys.get(passage_idx) else {
                tracing::error!(passage_idx, "ranked passage index out of range");
                continue;
            };
            let Some(text) = self.chunk_store.row(key) else {
                tracing::error!(key = %key, "ranked passage missing from chunk store");
                continue;
            };
            docs.push(text.to_string());
            doc_scores.push(scores.get(rank).copied().unwrap_or(0.0));
        }
        QuerySolution::new(query.to_string(), docs, doc_scores)
    }
}

/// Dense scores of every passage against the query embedding, min–max
/// normalized, returned as (descending order, sorted scores).
fn dense_passage_scores(state: &RetrievalState, query: &[f64]) -> (Vec<usize>, Vec<f64>) {
    if state.passage_embeddings.is_empty() {
        return (Vec::new(), Vec::new());
    }
    if state.passage_embeddings[0].len() != query.len() {
        tracing::error!(
            passage_dim = state.passage_embeddings[0].len(),
            query_dim = query.len(),
            "query/passage embedding dimension mismatch"
        );
        return (Vec::new(), Vec::new());
    }
    let scores: Vec<f64> = state
        .passage_embeddings
        .iter()
        .map(|row| row.iter().zip(query.iter()).map(|(a, b)| a * b).sum())
        .collect();
    let normalized = min_max_normalize(&scores);
    let order = argsort_descending(&normalized);
    let sorted: Vec<f64> = order.iter().map(|&i| normalized[i]).collect();
    (order, sorted)
}

/// Dense scores of every fact against the query embedding, min–max
/// normalized in fact-store order. Empty when there are no facts or the
/// dimensions disagree.
fn fact_scores(state: &RetrievalState, query: &[f64]) -> Vec<f64> {
    if state.fact_embeddings.is_empty() {
        tracing::error!("fact store is empty, cannot score facts");
        return Vec::new();
    }
    if state.fact_embeddings[0].len() != query.len() {
        tracing::error!(
            fact_dim = state.fact_embeddings[0].len(),
            query_dim = query.len(),
            "query/fact embedding dimension mismatch"
        );
        return Vec::new();
    }
    let scores: Vec<f64> = state
        .fact_embeddings
        .iter()
        .map(|row| row.iter().zip(query.iter()).map(|(a, b)| a * b).sum())
        .collect();
    min_max_normalize(&scores)
}
