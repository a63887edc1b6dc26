//! Answer evaluation: exact match and token F1 against gold aliases.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Canonical answer form: lowercase, strip punctuation, drop the articles
/// `a`/`an`/`the`, collapse whitespace.
pub fn normalize_answer(answer: &str) -> String {
    const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<>?@[\\]^_`{|}~";
    let lowered = answer.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if PUNCTUATION.contains(c) { ' ' } else { c })
        .collect();
    stripped
        .split_whitespace()
        .filter(|word| !matches!(*word, "a" | "an" | "the"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact match after normalization: 1.0 or 0.0
pub fn exact_match(gold: &str, prediction: &str) -> f64 {
    if normalize_answer(gold) == normalize_answer(prediction) {
        1.0
    } else {
        0.0
    }
}

/// Token-overlap F1 after normalization
pub fn f1_score(gold: &str, prediction: &str) -> f64 {
    let gold_normalized = normalize_answer(gold);
    let pred_normalized = normalize_answer(prediction);
    let gold_tokens: Vec<&str> = gold_normalized.split_whitespace().collect();
    let pred_tokens: Vec<&str> = pred_normalized.split_whitespace().collect();

    if gold_tokens.is_empty() || pred_tokens.is_empty() {
        // both empty counts as a match
        return if gold_tokens.is_empty() && pred_tokens.is_empty() {
            1.0
        } else {
            0.0
        };
    }

    let mut gold_counts: HashMap<&str, usize> = HashMap::new();
    for token in &gold_tokens {
        *gold_counts.entry(token).or_insert(0) += 1;
    }
    let mut overlap = 0usize;
    for token in &pred_tokens {
        if let Some(count) = gold_counts.get_mut(token) {
            if *count > 0 {
                *count -= 1;
                overlap += 1;
            }
        }
    }
    if overlap == 0 {
        return 0.0;
    }
    let precision = overlap as f64 / pred_tokens.len() as f64;
    let recall = overlap as f64 / gold_tokens.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Best score over all gold aliases
pub fn best_over_golds(golds: &[String], prediction: &str, metric: fn(&str, &str) -> f64) -> f64 {
    golds
        .iter()
        .map(|gold| metric(gold, prediction))
        .fold(0.0, f64::max)
}

/// Corpus-level QA metrics: mean per-query bests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaMetrics {
    /// Mean exact match
    pub exact_match: f64,
    /// Mean token F1
    pub f1: f64,
    /// Queries evaluated
    pub num_evaluated: usize,
}

/// Roll up metrics over (gold aliases, prediction) pairs. Queries without
/// gold answers are skipped.
pub fn evaluate_answers(pairs: &[(Option<&[String]>, Option<&str>)]) -> QaMetrics {
    let mut em_total = 0.0;
    let mut f1_total = 0.0;
    let mut evaluated = 0usize;
    for (golds, prediction) in pairs {
        let Some(golds) = golds else { continue };
        if golds.is_empty() {
            continue;
        }
        let prediction = prediction.unwrap_or("");
        em_total += best_over_golds(golds, prediction, exact_match);
        f1_total += best_over_golds(golds, prediction, f1_score);
        evaluated += 1;
    }
    if evaluated == 0 {
        return QaMetrics::default();
    }
    QaMetrics {
        exact_match: em_total / evaluated as f64,
        f1: f1_total / evaluated as f64,
        num_evaluated: evaluated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_answer() {
        assert_eq!(normalize_answer("The  quick, brown fox"), "quick brown fox");
        assert_eq!(normalize_answer("An apple."), "apple");
        assert_eq!(normalize_answer("Mother-in-law"), "mother in law");
    }

    #[test]
    fn test_exact_match_is_normalized_equality() {
        assert_eq!(exact_match("The Eiffel Tower", "eiffel tower!"), 1.0);
        assert_eq!(exact_match("Paris", "London"), 0.0);
    }

    #[test]
    fn test_f1_partial_overlap() {
        let score = f1_score("Barack Obama", "Obama");
        // precision 1.0, recall 0.5
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(f1_score("Paris", "Rome"), 0.0);
        assert_eq!(f1_score("same", "same"), 1.0);
    }

    #[test]
    fn test_best_over_golds() {
        let golds = vec!["USA".to_string(), "United States".to_string()];
        assert_eq!(best_over_golds(&golds, "the united states", exact_match), 1.0);
    }

    #[test]
    fn test_rollup() {
        let golds_a = vec!["Paris".to_string()];
        let golds_b = vec!["Rome".to_string()];
        let metrics = evaluate_answers(&[
            (Some(golds_a.as_slice()), Some("paris")),
            (Some(golds_b.as_slice()), Some("Milan")),
            (None, Some("ignored")),
        ]);
        assert_eq!(metrics.num_evaluated, 2);
        assert!((metrics.exact_match - 0.5).abs() < 1e-9);
    }
}
