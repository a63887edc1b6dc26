//! Typed property graph over integer vertex indices.
//!
//! Vertices live in an arena (`Vec<VertexAttrs>`); edges are
//! `(src_idx, tgt_idx, weight)` records; a secondary `name → index` map gives
//! O(1) lookup. Callers hold names or indices, never references, so deletes
//! can compact the arena freely.

pub mod pagerank;

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::{GraphQaError, Result};
use crate::storage::write_json_atomic;

pub use pagerank::PageRankConfig;

/// Attributes carried by every vertex. The closed set is `name`, `hash_id`,
/// `content`; the serialized form stays a map so old files with extra keys
/// keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexAttrs {
    /// Vertex name; equals the content hash id
    pub name: String,
    /// Content hash id (`chunk-...` or `entity-...`)
    pub hash_id: String,
    /// Raw text behind the vertex
    #[serde(default)]
    pub content: String,
    /// Forward-compatibility bag for unknown keys
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl VertexAttrs {
    /// Build attributes for a content-addressed vertex
    pub fn new(hash_id: String, content: String) -> Self {
        Self {
            name: hash_id.clone(),
            hash_id,
            content,
            extra: IndexMap::new(),
        }
    }
}

/// A columnar batch of vertices to add; all columns must be equal length.
#[derive(Debug, Default)]
pub struct VertexBatch {
    /// Vertex names (also used as hash ids)
    pub names: Vec<String>,
    /// Raw contents aligned with `names`
    pub contents: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeRecord {
    source: usize,
    target: usize,
    weight: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    directed: bool,
    vertices: Vec<VertexAttrs>,
    edges: Vec<EdgeRecord>,
}

/// Weighted property graph with a vertex-name index and personalized
/// PageRank.
#[derive(Debug, Clone)]
pub struct SimpleGraph {
    directed: bool,
    vertices: Vec<VertexAttrs>,
    edges: Vec<(usize, usize, f64)>,
    name_index: HashMap<String, usize>,
}

impl SimpleGraph {
    /// Create an empty graph
    pub fn new(directed: bool) -> Self {
        Self {
            directed,
            vertices: Vec::new(),
            edges: Vec::new(),
            name_index: HashMap::new(),
        }
    }

    /// Whether edges are interpreted as directed
    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// Number of vertices
    pub fn vcount(&self) -> usize {
        self.vertices.len()
    }

    /// Number of edge records
    pub fn ecount(&self) -> usize {
        self.edges.len()
    }

    /// All vertex names in index order
    pub fn vertex_names(&self) -> Vec<String> {
        self.vertices.iter().map(|v| v.name.clone()).collect()
    }

    /// Look up a vertex index by name
    pub fn vertex_index(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    /// Whether a vertex with this name exists
    pub fn has_vertex(&self, name: &str) -> bool {
        self.name_index.contains_key(name)
    }

    /// Vertex attributes by index
    pub fn vertex(&self, idx: usize) -> Option<&VertexAttrs> {
        self.vertices.get(idx)
    }

    /// Iterate raw edge records `(src_idx, tgt_idx, weight)`
    pub fn edges(&self) -> impl Iterator<Item = &(usize, usize, f64)> {
        self.edges.iter()
    }

    /// Add a columnar batch of vertices.
    ///
    /// Mismatched column lengths and duplicate names are invariant
    /// violations: the graph must mirror the embedding stores exactly.
    pub fn add_vertices(&mut self, batch: VertexBatch) -> Result<()> {
        if batch.names.len() != batch.contents.len() {
            return Err(GraphQaError::Invariant {
                message: format!(
                    "vertex batch columns differ in length: {} names vs {} contents",
                    batch.names.len(),
                    batch.contents.len()
                ),
            });
        }
        for (name, content) in batch.names.iter().zip(batch.contents.iter()) {
            if self.name_index.contains_key(name) {
                return Err(GraphQaError::Invariant {
                    message: format!("duplicate vertex name: {name}"),
                });
            }
            let idx = self.vertices.len();
            self.vertices.push(VertexAttrs::new(name.clone(), content.clone()));
            self.name_index.insert(name.clone(), idx);
        }
        Ok(())
    }

    /// Add weighted edges given by endpoint names.
    ///
    /// Pairs referencing unknown names and self-loops are dropped; the drop
    /// count is logged. `pairs` and `weights` must align.
    pub fn add_edges(&mut self, pairs: &[(String, String)], weights: &[f64]) -> Result<()> {
        if pairs.len() != weights.len() {
            return Err(GraphQaError::Invariant {
                message: format!(
                    "edge batch columns differ in length: {} pairs vs {} weights",
                    pairs.len(),
                    weights.len()
                ),
            });
        }
        let mut dropped = 0usize;
        for ((from, to), &weight) in pairs.iter().zip(weights.iter()) {
            let (src, tgt) = match (self.name_index.get(from), self.name_index.get(to)) {
                (Some(&s), Some(&t)) => (s, t),
                _ => {
                    dropped += 1;
                    continue;
                },
            };
            if src == tgt {
                dropped += 1;
                continue;
            }
            self.edges.push((src, tgt, weight));
        }
        if dropped > 0 {
            tracing::warn!(dropped, "dropped edges with unknown endpoints or self-loops");
        }
        Ok(())
    }

    /// Delete vertices by name, cascading to all incident edges.
    ///
    /// Unknown names are ignored. The arena is compacted and the name index
    /// rebuilt; surviving edge records are re-pointed at the new indices.
    pub fn delete_vertices(&mut self, names: &[String]) {
        let doomed: Vec<usize> = names
            .iter()
            .filter_map(|n| self.name_index.get(n).copied())
            .collect();
        if doomed.is_empty() {
            return;
        }
        let mut keep = vec![true; self.vertices.len()];
        for idx in &doomed {
            keep[*idx] = false;
        }

        // old index -> new index for survivors
        let mut remap = vec![usize::MAX; self.vertices.len()];
        let mut next = 0usize;
        for (old, kept) in keep.iter().enumerate() {
            if *kept {
                remap[old] = next;
                next += 1;
            }
        }

        self.edges.retain(|(s, t, _)| keep[*s] && keep[*t]);
        for edge in &mut self.edges {
            edge.0 = remap[edge.0];
            edge.1 = remap[edge.1];
        }

        let mut survivors = Vec::with_capacity(next);
        for (old, vertex) in self.vertices.drain(..).enumerate() {
            if keep[old] {
                survivors.push(vertex);
            }
        }
        self.vertices = survivors;

        self.name_index.clear();
        for (idx, vertex) in self.vertices.iter().enumerate() {
            self.name_index.insert(vertex.name.clone(), idx);
        }
    }

    /// Personalized PageRank over the current structure.
    ///
    /// `reset` must have one entry per vertex; see [`pagerank`] for the
    /// iteration and dangling-mass handling.
    pub fn personalized_page_rank(&self, reset: &[f64], damping: f64) -> Result<Vec<f64>> {
        let config = PageRankConfig {
            damping,
            ..PageRankConfig::default()
        };
        pagerank::personalized_page_rank(self, reset, &config)
    }

    /// Persist to JSON at `path` via atomic replace
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = GraphFile {
            directed: self.directed,
            vertices: self.vertices.clone(),
            edges: self
                .edges
                .iter()
                .map(|&(source, target, weight)| EdgeRecord {
                    source,
                    target,
                    weight,
                })
                .collect(),
        };
        write_json_atomic(path, &file)
    }

    /// Load a graph saved by [`SimpleGraph::save`]. Unknown vertex keys are
    /// preserved in the attribute bag.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: GraphFile = serde_json::from_str(&raw)?;
        let vcount = file.vertices.len();
        let mut graph = SimpleGraph::new(file.directed);
        for (idx, vertex) in file.vertices.into_iter().enumerate() {
            graph.name_index.insert(vertex.name.clone(), idx);
            graph.vertices.push(vertex);
        }
        for edge in file.edges {
            if edge.source >= vcount || edge.target >= vcount {
                tracing::warn!(
                    source = edge.source,
                    target = edge.target,
                    "skipping edge with out-of-range endpoint"
                );
                continue;
            }
            graph.edges.push((edge.source, edge.target, edge.weight));
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_graph() -> SimpleGraph {
        let mut g = SimpleGraph::new(false);
        g.add_vertices(VertexBatch {
            names: vec!["a".into(), "b".into(), "c".into()],
            contents: vec!["A".into(), "B".into(), "C".into()],
        })
        .unwrap();
        g.add_edges(
            &[("a".into(), "b".into()), ("b".into(), "c".into())],
            &[1.0, 2.0],
        )
        .unwrap();
        g
    }

    #[test]
    fn test_counts_and_lookup() {
        let g = toy_graph();
        assert_eq!(g.vcount(), 3);
        assert_eq!(g.ecount(), 2);
        assert_eq!(g.vertex_index("b"), Some(1));
        assert_eq!(g.vertex(1).unwrap().content, "B");
    }

    #[test]
    fn test_duplicate_vertex_is_fatal() {
        let mut g = toy_graph();
        let err = g
            .add_vertices(VertexBatch {
                names: vec!["a".into()],
                contents: vec!["again".into()],
            })
            .unwrap_err();
        assert!(matches!(err, GraphQaError::Invariant { .. }));
    }

    #[test]
    fn test_unknown_endpoints_and_self_loops_dropped() {
        let mut g = toy_graph();
        g.add_edges(
            &[
                ("a".into(), "nope".into()),
                ("a".into(), "a".into()),
                ("c".into(), "a".into()),
            ],
            &[1.0, 1.0, 1.0],
        )
        .unwrap();
        assert_eq!(g.ecount(), 3); // only c->a landed
    }

    #[test]
    fn test_delete_compacts_and_remaps() {
        let mut g = toy_graph();
        g.delete_vertices(&["a".to_string()]);
        assert_eq!(g.vcount(), 2);
        // a->b edge cascaded away, b->c survived under new indices
        assert_eq!(g.ecount(), 1);
        let (s, t, w) = g.edges[0];
        assert_eq!(g.vertex(s).unwrap().name, "b");
        assert_eq!(g.vertex(t).unwrap().name, "c");
        assert_eq!(w, 2.0);
        // unknown names are a no-op
        g.delete_vertices(&["ghost".to_string()]);
        assert_eq!(g.vcount(), 2);
    }

    #[test]
    fn test_save_load_symmetry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let g = toy_graph();
        g.save(&path).unwrap();
        let loaded = SimpleGraph::load(&path).unwrap();
        assert_eq!(loaded.is_directed(), g.is_directed());
        assert_eq!(loaded.vertex_names(), g.vertex_names());
        assert_eq!(loaded.edges, g.edges);
        assert_eq!(loaded.vertex(0).unwrap(), g.vertex(0).unwrap());
    }

    #[test]
    fn test_load_tolerates_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(
            &path,
            r#"{"directed":false,"formatVersion":"9.9",
                "vertices":[{"name":"x","hash_id":"x","content":"","color":"red"}],
                "edges":[]}"#,
        )
        .unwrap();
        let loaded = SimpleGraph::load(&path).unwrap();
        assert_eq!(loaded.vcount(), 1);
        assert_eq!(
            loaded.vertex(0).unwrap().extra.get("color"),
            Some(&serde_json::json!("red"))
        );
    }
}
