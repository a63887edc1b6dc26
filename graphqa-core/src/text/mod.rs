//! Text processing utilities shared by the indexer, the retriever, and the
//! fact reranker.

use std::collections::BTreeSet;

use crate::core::Triple;

/// Canonicalize a phrase: lowercase, replace every character outside
/// `[A-Za-z0-9 ]` with a space, trim.
///
/// Phrase identity is byte-equality of this form, so it must stay stable:
/// two raw spellings map to the same entity node iff their processed forms
/// are identical.
pub fn text_processing(s: &str) -> String {
    let lowered: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == ' ' { c } else { ' ' })
        .collect();
    lowered.trim().to_string()
}

/// Apply [`text_processing`] to each slot of a triple independently
pub fn process_triple(triple: &Triple) -> Triple {
    Triple::new(
        text_processing(triple.subject()),
        text_processing(triple.relation()),
        text_processing(triple.object()),
    )
}

/// Keep only rows of length exactly 3 and drop exact duplicates,
/// preserving first-seen order.
pub fn filter_invalid_triples(rows: &[Vec<String>]) -> Vec<Triple> {
    let mut seen: BTreeSet<[String; 3]> = BTreeSet::new();
    let mut out = Vec::new();
    for row in rows {
        if row.len() != 3 {
            continue;
        }
        let parts = [row[0].clone(), row[1].clone(), row[2].clone()];
        if seen.insert(parts.clone()) {
            out.push(Triple(parts));
        }
    }
    out
}

/// Token set of a triple joined with spaces: lowercase, strip non-alnum,
/// split on whitespace. Used by the reranker's fuzzy match.
pub fn token_set(parts: &[String]) -> BTreeSet<String> {
    let joined = parts.join(" ").to_lowercase();
    let cleaned: String = joined
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().map(|t| t.to_string()).collect()
}

/// Jaccard similarity of two token sets
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Min–max normalization of a score vector.
///
/// Nonconstant input maps onto [0, 1]; constant input maps to all ones.
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|&x| (x - min) / (max - min)).collect()
}

/// Indices that would sort `scores` in descending order
pub fn argsort_descending(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_processing() {
        assert_eq!(text_processing("Barack Obama"), "barack obama");
        assert_eq!(text_processing("  U.S.A.! "), "u s a");
        assert_eq!(text_processing("cafe-au-lait"), "cafe au lait");
        assert_eq!(text_processing(""), "");
    }

    #[test]
    fn test_collapse_to_same_entity_iff_processed_equal() {
        assert_eq!(text_processing("US"), text_processing("us"));
        assert_ne!(text_processing("US"), text_processing("USA"));
    }

    #[test]
    fn test_filter_invalid_triples() {
        let rows = vec![
            vec!["a".to_string(), "r".to_string(), "b".to_string()],
            vec!["too".to_string(), "short".to_string()],
            vec!["a".to_string(), "r".to_string(), "b".to_string()],
            vec!["a".to_string(), "r".to_string(), "b".to_string(), "extra".to_string()],
            vec!["c".to_string(), "r".to_string(), "d".to_string()],
        ];
        let filtered = filter_invalid_triples(&rows);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].subject(), "a");
        assert_eq!(filtered[1].object(), "d");
    }

    #[test]
    fn test_jaccard_tokens() {
        let a = token_set(&["A".to_string(), "relates".to_string(), "B".to_string()]);
        let b = token_set(&["a".to_string(), "relates".to_string(), "b".to_string()]);
        assert!((jaccard(&a, &b) - 1.0).abs() < 1e-12);

        let c = token_set(&["x".to_string(), "y".to_string(), "z".to_string()]);
        assert_eq!(jaccard(&a, &c), 0.0);
    }

    #[test]
    fn test_min_max_normalize() {
        let out = min_max_normalize(&[1.0, 3.0, 2.0]);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 1.0);
        assert!((out[2] - 0.5).abs() < 1e-12);

        let constant = min_max_normalize(&[0.7, 0.7]);
        assert_eq!(constant, vec![1.0, 1.0]);

        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn test_argsort_descending() {
        assert_eq!(argsort_descending(&[0.1, 0.9, 0.5]), vec![1, 2, 0]);
    }
}
