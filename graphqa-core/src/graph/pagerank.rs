//! Personalized PageRank over a [`SimpleGraph`].
//!
//! Jacobi-style power iteration with explicit dangling-mass redistribution:
//! score sitting on vertices with no outgoing weight is routed back through
//! the reset distribution each step, which keeps the result a probability
//! vector even when the graph has sinks.

use sprs::{CsMat, TriMat};

use crate::core::{GraphQaError, Result};
use crate::graph::SimpleGraph;

/// Configuration for the PageRank iteration
#[derive(Debug, Clone)]
pub struct PageRankConfig {
    /// Damping factor: fraction of mass that follows edges each step
    pub damping: f64,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// L1 convergence tolerance
    pub tolerance: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.5,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// Compute personalized PageRank scores.
///
/// `reset` must have exactly one entry per vertex. NaN and negative entries
/// are clamped to zero before normalization; an all-zero reset falls back to
/// the uniform distribution.
pub fn personalized_page_rank(
    graph: &SimpleGraph,
    reset: &[f64],
    config: &PageRankConfig,
) -> Result<Vec<f64>> {
    let n = graph.vcount();
    if n == 0 {
        return Ok(Vec::new());
    }
    if reset.len() != n {
        return Err(GraphQaError::Invariant {
            message: format!(
                "reset vector length {} does not match vertex count {}",
                reset.len(),
                n
            ),
        });
    }

    let r = normalize_reset(reset, n);
    let adjacency = build_adjacency(graph, n);
    let out: Vec<f64> = (0..n)
        .map(|i| {
            adjacency
                .outer_view(i)
                .map(|row| row.iter().map(|(_, &w)| w).sum())
                .unwrap_or(0.0)
        })
        .collect();

    let d = config.damping;
    let mut scores = vec![1.0 / n as f64; n];
    let mut next = vec![0.0; n];

    for _iteration in 0..config.max_iterations {
        let dangling: f64 = scores
            .iter()
            .zip(out.iter())
            .filter(|(_, &o)| o == 0.0)
            .map(|(&s, _)| s)
            .sum();

        for j in 0..n {
            next[j] = (1.0 - d) * r[j] + d * dangling * r[j];
        }
        for (i, &score) in scores.iter().enumerate() {
            if out[i] <= 0.0 {
                continue;
            }
            let contribution = d * score / out[i];
            if let Some(row) = adjacency.outer_view(i) {
                for (j, &weight) in row.iter() {
                    next[j] += contribution * weight;
                }
            }
        }

        let diff: f64 = scores
            .iter()
            .zip(next.iter())
            .map(|(&a, &b)| (a - b).abs())
            .sum();
        std::mem::swap(&mut scores, &mut next);
        if diff < config.tolerance {
            break;
        }
    }

    Ok(scores)
}

fn normalize_reset(reset: &[f64], n: usize) -> Vec<f64> {
    let clamped: Vec<f64> = reset
        .iter()
        .map(|&x| if x.is_nan() || x < 0.0 { 0.0 } else { x })
        .collect();
    let total: f64 = clamped.iter().sum();
    if total > 0.0 {
        clamped.iter().map(|&x| x / total).collect()
    } else {
        vec![1.0 / n as f64; n]
    }
}

/// Adjacency in CSR form. Directed edges contribute `(src → tgt, w)`;
/// undirected graphs additionally get the reverse entry.
fn build_adjacency(graph: &SimpleGraph, n: usize) -> CsMat<f64> {
    let mut triplets = TriMat::new((n, n));
    for &(src, tgt, weight) in graph.edges() {
        triplets.add_triplet(src, tgt, weight);
        if !graph.is_directed() {
            triplets.add_triplet(tgt, src, weight);
        }
    }
    triplets.to_csr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::VertexBatch;

    fn two_node_graph() -> SimpleGraph {
        let mut g = SimpleGraph::new(false);
        g.add_vertices(VertexBatch {
            names: vec!["a".into(), "b".into()],
            contents: vec![String::new(), String::new()],
        })
        .unwrap();
        g.add_edges(&[("a".into(), "b".into())], &[1.0]).unwrap();
        g
    }

    #[test]
    fn test_scores_sum_to_one() {
        let g = two_node_graph();
        let scores = g.personalized_page_rank(&[1.0, 0.0], 0.5).unwrap();
        let total: f64 = scores.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "sum was {total}");
    }

    #[test]
    fn test_seed_concentrates_mass() {
        let g = two_node_graph();
        let scores = g.personalized_page_rank(&[1.0, 0.0], 0.5).unwrap();
        assert!(scores[0] > scores[1]);
        assert!(scores[1] > 0.0, "mass must propagate along the edge");
    }

    #[test]
    fn test_dangling_mass_with_sink() {
        // Directed a -> b where b is a sink; without dangling handling the
        // total mass leaks.
        let mut g = SimpleGraph::new(true);
        g.add_vertices(VertexBatch {
            names: vec!["a".into(), "b".into(), "c".into()],
            contents: vec![String::new(); 3],
        })
        .unwrap();
        g.add_edges(&[("a".into(), "b".into())], &[1.0]).unwrap();
        let scores = g.personalized_page_rank(&[1.0, 0.0, 0.0], 0.5).unwrap();
        let total: f64 = scores.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "sum was {total}");
    }

    #[test]
    fn test_zero_reset_falls_back_to_uniform() {
        let g = two_node_graph();
        let scores = g.personalized_page_rank(&[0.0, 0.0], 0.5).unwrap();
        assert!((scores[0] - scores[1]).abs() < 1e-6);
    }

    #[test]
    fn test_nan_and_negative_reset_clamped() {
        let g = two_node_graph();
        let scores = g
            .personalized_page_rank(&[f64::NAN, -3.0], 0.5)
            .unwrap();
        let total: f64 = scores.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_length_mismatch_is_fatal() {
        let g = two_node_graph();
        let err = g.personalized_page_rank(&[1.0], 0.5).unwrap_err();
        assert!(matches!(err, GraphQaError::Invariant { .. }));
    }

    #[test]
    fn test_empty_graph() {
        let g = SimpleGraph::new(false);
        assert!(g.personalized_page_rank(&[], 0.5).unwrap().is_empty());
    }
}
