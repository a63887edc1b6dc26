//! LLM-driven fact filter.
//!
//! Given a query and dense-scored candidate triples, asks the model for the
//! relevant subset in a fixed JSON schema, then maps the returned facts back
//! onto candidates: exact list equality first, Jaccard token overlap second.
//! The fuzzy fallback matters because the model normalizes surface forms, so
//! exact equality alone underreports recall.

use std::sync::Arc;

use regex::Regex;
use serde_json::json;

use crate::core::traits::LanguageModel;
use crate::core::Triple;
use crate::openie::extract_json_object;
use crate::prompts::PromptRegistry;
use crate::text::{jaccard, token_set};

/// Minimum Jaccard overlap for a fuzzy candidate match
const FUZZY_MATCH_THRESHOLD: f64 = 0.2;

/// Diagnostics from one rerank call
#[derive(Debug, Clone, Default)]
pub struct RerankLog {
    /// Raw model response, when a call was made
    pub model_response: Option<String>,
    /// Reserved: the filter reports no calibrated confidence
    pub confidence: Option<f64>,
    /// Error message when the model call failed and the original order was
    /// kept
    pub error: Option<String>,
}

/// The fact reranker (C5)
pub struct FactReranker {
    llm: Arc<dyn LanguageModel>,
    fact_pattern: Regex,
}

impl FactReranker {
    /// Build a reranker around a language model
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            // first {...} whose body maps "fact" to an array
            fact_pattern: Regex::new(r#"(?s)\{[^{}]*?"fact"\s*:\s*\[.*?\][^{}]*?\}"#)
                .expect("static regex"),
        }
    }

    /// Filter `candidates` down to the facts the model considers relevant.
    ///
    /// `candidate_indices` are the candidates' positions in the global fact
    /// list; the returned indices are drawn from it. On any model failure the
    /// original order is returned truncated to `k`, with the error recorded
    /// in the log.
    pub fn rerank(
        &self,
        prompts: &PromptRegistry,
        query: &str,
        candidates: &[Triple],
        candidate_indices: &[usize],
        k: usize,
    ) -> (Vec<usize>, Vec<Triple>, RerankLog) {
        if candidates.is_empty() {
            return (Vec::new(), Vec::new(), RerankLog::default());
        }

        let facts_json = json!({
            "fact": candidates.iter().map(|t| &t.0).collect::<Vec<_>>()
        })
        .to_string();
        let messages = prompts.render(
            "rerank_fact_filter",
            "rerank_fact_filter",
            &[("question", query), ("facts", facts_json.as_str())],
        );

        let reply = match self.llm.infer(&messages) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "fact filter call failed, keeping original order");
                let log = RerankLog {
                    error: Some(e.to_string()),
                    ..RerankLog::default()
                };
                return (
                    candidate_indices.iter().take(k).copied().collect(),
                    candidates.iter().take(k).cloned().collect(),
                    log,
                );
            },
        };

        let returned = self.parse_facts(&reply.response);
        let matched = match_candidates(&returned, candidates);

        let (indices, facts) = if matched.is_empty() {
            tracing::warn!("fact filter returned nothing matchable, keeping original order");
            (
                candidate_indices.iter().take(k).copied().collect(),
                candidates.iter().take(k).cloned().collect(),
            )
        } else {
            (
                matched
                    .iter()
                    .take(k)
                    .map(|&c| candidate_indices[c])
                    .collect(),
                matched
                    .iter()
                    .take(k)
                    .map(|&c| candidates[c].clone())
                    .collect(),
            )
        };

        let log = RerankLog {
            model_response: Some(reply.response),
            confidence: None,
            error: None,
        };
        (indices, facts, log)
    }

    /// Locate the `"fact"` array in the response: full-text JSON parse first,
    /// then the tolerant regex scan.
    fn parse_facts(&self, response: &str) -> Vec<Triple> {
        let value = extract_json_object(response)
            .filter(|v| v.get("fact").map(|f| f.is_array()).unwrap_or(false))
            .or_else(|| {
                self.fact_pattern
                    .find(response)
                    .and_then(|m| serde_json::from_str(m.as_str()).ok())
            });
        let Some(value) = value else {
            return Vec::new();
        };
        value
            .get("fact")
            .and_then(|f| f.as_array())
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.as_array())
                    .filter(|row| row.len() == 3)
                    .map(|row| {
                        Triple::new(
                            row[0].as_str().unwrap_or_default().to_string(),
                            row[1].as_str().unwrap_or_default().to_string(),
                            row[2].as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Match each returned triple to a candidate position, each candidate usable
/// at most once. Exact list equality wins; otherwise the best Jaccard overlap
/// at or above the threshold.
fn match_candidates(returned: &[Triple], candidates: &[Triple]) -> Vec<usize> {
    let mut used = vec![false; candidates.len()];
    let mut matched = Vec::new();
    for triple in returned {
        if let Some(pos) = candidates
            .iter()
            .enumerate()
            .find(|(i, c)| !used[*i] && *c == triple)
            .map(|(i, _)| i)
        {
            used[pos] = true;
            matched.push(pos);
            continue;
        }
        let tokens = token_set(&triple.0);
        let best = candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| !used[*i])
            .map(|(i, c)| (i, jaccard(&tokens, &token_set(&c.0))))
            .filter(|(_, sim)| *sim >= FUZZY_MATCH_THRESHOLD)
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((pos, _)) = best {
            used[pos] = true;
            matched.push(pos);
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_providers::MockLanguageModel;

    fn triple(s: &str, r: &str, o: &str) -> Triple {
        Triple::new(s.to_string(), r.to_string(), o.to_string())
    }

    fn candidates() -> Vec<Triple> {
        vec![
            triple("A", "relates", "B"),
            triple("c", "knows", "d"),
            triple("e", "likes", "f"),
        ]
    }

    #[test]
    fn test_empty_candidates_short_circuit() {
        let reranker = FactReranker::new(Arc::new(MockLanguageModel::failing()));
        let prompts = PromptRegistry::new();
        let (idx, facts, log) = reranker.rerank(&prompts, "q", &[], &[], 5);
        assert!(idx.is_empty() && facts.is_empty());
        assert!(log.error.is_none());
    }

    #[test]
    fn test_exact_match_selection() {
        let llm = MockLanguageModel::always(r#"{"fact": [["c", "knows", "d"]]}"#);
        let reranker = FactReranker::new(Arc::new(llm));
        let prompts = PromptRegistry::new();
        let (idx, facts, _) = reranker.rerank(&prompts, "q", &candidates(), &[10, 11, 12], 5);
        assert_eq!(idx, vec![11]);
        assert_eq!(facts, vec![triple("c", "knows", "d")]);
    }

    #[test]
    fn test_fuzzy_match_normalized_surface_form() {
        // the model lowercased the candidate; Jaccard on cleaned tokens is 1.0
        let llm = MockLanguageModel::always(r#"{"fact": [["a", "relates", "b"]]}"#);
        let reranker = FactReranker::new(Arc::new(llm));
        let prompts = PromptRegistry::new();
        let (idx, facts, _) = reranker.rerank(&prompts, "q", &candidates(), &[0, 1, 2], 5);
        assert_eq!(idx, vec![0]);
        assert_eq!(facts, vec![triple("A", "relates", "B")]);
    }

    #[test]
    fn test_each_candidate_matched_once() {
        let llm = MockLanguageModel::always(
            r#"{"fact": [["a", "relates", "b"], ["A", "relates", "B"]]}"#,
        );
        let reranker = FactReranker::new(Arc::new(llm));
        let prompts = PromptRegistry::new();
        let (idx, _, _) = reranker.rerank(&prompts, "q", &candidates(), &[0, 1, 2], 5);
        // second copy cannot rebind the same candidate
        assert_eq!(idx, vec![0]);
    }

    #[test]
    fn test_llm_failure_falls_back_with_error() {
        let reranker = FactReranker::new(Arc::new(MockLanguageModel::failing()));
        let prompts = PromptRegistry::new();
        let (idx, facts, log) = reranker.rerank(&prompts, "q", &candidates(), &[7, 8, 9], 2);
        assert_eq!(idx, vec![7, 8]);
        assert_eq!(facts.len(), 2);
        assert!(log.error.is_some());
    }

    #[test]
    fn test_unparseable_response_falls_back() {
        let llm = MockLanguageModel::always("I could not decide.");
        let reranker = FactReranker::new(Arc::new(llm));
        let prompts = PromptRegistry::new();
        let (idx, _, log) = reranker.rerank(&prompts, "q", &candidates(), &[0, 1, 2], 2);
        assert_eq!(idx, vec![0, 1]);
        assert!(log.error.is_none());
        assert!(log.model_response.is_some());
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let llm = MockLanguageModel::always(
            "The relevant facts are: {\"fact\": [[\"e\", \"likes\", \"f\"]]} as requested.",
        );
        let reranker = FactReranker::new(Arc::new(llm));
        let prompts = PromptRegistry::new();
        let (idx, _, _) = reranker.rerank(&prompts, "q", &candidates(), &[0, 1, 2], 5);
        assert_eq!(idx, vec![2]);
    }
}
