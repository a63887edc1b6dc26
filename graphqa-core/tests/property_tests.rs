//! Property-based tests for the system invariants: hash determinism,
//! normalization bounds, PPR probability conservation, and store round-trips.

use graphqa_core::core::mock_providers::MockEmbedder;
use graphqa_core::evaluation::{exact_match, normalize_answer};
use graphqa_core::graph::{SimpleGraph, VertexBatch};
use graphqa_core::storage::EmbeddingStore;
use graphqa_core::text::min_max_normalize;
use graphqa_core::content_hash;
use proptest::prelude::*;

fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-zA-Z0-9 .,!?]{1,200}").unwrap()
}

proptest! {
    #[test]
    fn hash_is_deterministic_and_prefixed(text in text_strategy(), prefix in prop::sample::select(vec!["chunk-", "entity-", "fact-"])) {
        let a = content_hash(&text, prefix);
        let b = content_hash(&text, prefix);
        prop_assert_eq!(&a, &b);
        prop_assert!(a.starts_with(prefix));
        prop_assert_eq!(a.len(), prefix.len() + 32);
    }

    #[test]
    fn min_max_output_is_bounded(scores in prop::collection::vec(-1e6f64..1e6, 1..50)) {
        let normalized = min_max_normalize(&scores);
        prop_assert_eq!(normalized.len(), scores.len());
        for value in &normalized {
            prop_assert!(*value >= 0.0 && *value <= 1.0);
        }
        let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if (max - min).abs() < f64::EPSILON {
            // constant input maps to all ones
            for value in &normalized {
                prop_assert_eq!(*value, 1.0);
            }
        } else {
            prop_assert!(normalized.iter().any(|v| *v == 0.0));
            prop_assert!(normalized.iter().any(|v| *v == 1.0));
        }
    }

    #[test]
    fn normalize_answer_is_idempotent(answer in text_strategy()) {
        let once = normalize_answer(&answer);
        let twice = normalize_answer(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn exact_match_agrees_with_normalized_equality(a in text_strategy(), b in text_strategy()) {
        let matches = exact_match(&a, &b) == 1.0;
        prop_assert_eq!(matches, normalize_answer(&a) == normalize_answer(&b));
    }

    #[test]
    fn ppr_scores_form_a_probability_vector(
        n in 2usize..8,
        edges in prop::collection::vec((0usize..8, 0usize..8, 0.1f64..5.0), 0..20),
        seed in 0usize..8,
    ) {
        let mut graph = SimpleGraph::new(true);
        let names: Vec<String> = (0..n).map(|i| format!("v{i}")).collect();
        graph.add_vertices(VertexBatch {
            names: names.clone(),
            contents: vec![String::new(); n],
        }).unwrap();
        let pairs: Vec<(String, String)> = edges
            .iter()
            .filter(|(s, t, _)| *s < n && *t < n)
            .map(|(s, t, _)| (names[*s].clone(), names[*t].clone()))
            .collect();
        let weights: Vec<f64> = edges
            .iter()
            .filter(|(s, t, _)| *s < n && *t < n)
            .map(|(_, _, w)| *w)
            .collect();
        graph.add_edges(&pairs, &weights).unwrap();

        let mut reset = vec![0.0; n];
        reset[seed % n] = 1.0;
        let scores = graph.personalized_page_rank(&reset, 0.5).unwrap();
        let total: f64 = scores.iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-6, "total mass {}", total);
        for score in &scores {
            prop_assert!(*score >= 0.0);
        }
    }

    #[test]
    fn store_round_trips_through_disk(texts in prop::collection::vec(text_strategy(), 1..10)) {
        let dir = tempfile::tempdir().unwrap();
        let embedder = MockEmbedder::new(8);
        let (ids, stored_texts) = {
            let mut store = EmbeddingStore::open(dir.path(), "chunk").unwrap();
            store.insert(&texts, &embedder, None).unwrap();
            (store.all_ids(), store.all_texts())
        };
        let reopened = EmbeddingStore::open(dir.path(), "chunk").unwrap();
        prop_assert_eq!(reopened.all_ids(), ids);
        prop_assert_eq!(reopened.all_texts(), stored_texts);
    }

    #[test]
    fn graph_save_load_symmetry(
        n in 1usize..6,
        edges in prop::collection::vec((0usize..6, 0usize..6, 0.1f64..3.0), 0..10),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let mut graph = SimpleGraph::new(false);
        let names: Vec<String> = (0..n).map(|i| format!("node{i}")).collect();
        graph.add_vertices(VertexBatch {
            names: names.clone(),
            contents: names.clone(),
        }).unwrap();
        let pairs: Vec<(String, String)> = edges
            .iter()
            .filter(|(s, t, _)| *s < n && *t < n)
            .map(|(s, t, _)| (names[*s].clone(), names[*t].clone()))
            .collect();
        let weights: Vec<f64> = edges
            .iter()
            .filter(|(s, t, _)| *s < n && *t < n)
            .map(|(_, _, w)| *w)
            .collect();
        graph.add_edges(&pairs, &weights).unwrap();

        graph.save(&path).unwrap();
        let loaded = SimpleGraph::load(&path).unwrap();
        prop_assert_eq!(loaded.vcount(), graph.vcount());
        prop_assert_eq!(loaded.ecount(), graph.ecount());
        prop_assert_eq!(loaded.vertex_names(), graph.vertex_names());
        let original: Vec<_> = graph.edges().collect();
        let round_tripped: Vec<_> = loaded.edges().collect();
        prop_assert_eq!(original, round_tripped);
    }
}
