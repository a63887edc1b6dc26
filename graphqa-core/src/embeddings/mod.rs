//! Embedding clients.
//!
//! [`HttpEmbedder`] talks to any OpenAI-compatible `/embeddings` endpoint;
//! [`HashEmbedder`] is a deterministic local fallback that needs no network
//! and powers offline runs and tests. Both honor the instruction-prefix and
//! L2-normalization parts of the [`Embedder`] contract.

use std::time::Duration;

use md5::{Digest, Md5};
use serde_json::json;

use crate::config::EmbeddingConfig;
use crate::core::traits::Embedder;
use crate::core::{GraphQaError, Result};
use crate::llm::backoff_delay;

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Reserved embedding model name selecting [`HashEmbedder`]
pub const LOCAL_HASH_EMBEDDER: &str = "local-hash";

/// Build the embedder named by the config: the hash fallback for
/// `local-hash`, an HTTP client otherwise.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    if config.name == LOCAL_HASH_EMBEDDER {
        Ok(Box::new(HashEmbedder::new(config.dimension)))
    } else {
        Ok(Box::new(HttpEmbedder::new(config)?))
    }
}

fn apply_instruction(texts: &[String], instruction: Option<&str>) -> Vec<String> {
    match instruction {
        Some(prefix) => texts.iter().map(|t| format!("{prefix} {t}")).collect(),
        None => texts.to_vec(),
    }
}

fn l2_normalize(vector: &mut [f64]) {
    let norm: f64 = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Embedding client for an OpenAI-compatible endpoint.
pub struct HttpEmbedder {
    agent: ureq::Agent,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_retry_attempts: u32,
}

impl HttpEmbedder {
    /// Build a client from config; see [`crate::llm::OpenAiChatClient`] for
    /// the key policy.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string());
        let api_key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("AZURE_OPENAI_API_KEY"))
            .ok();
        if api_key.is_none() && base_url == OPENAI_DEFAULT_BASE_URL {
            return Err(GraphQaError::Config {
                message: "OPENAI_API_KEY is not set and no custom embedding base_url was given"
                    .to_string(),
            });
        }
        Ok(Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.name.clone(),
            api_key,
            max_retry_attempts: config.max_retry_attempts,
        })
    }

    fn request_once(&self, inputs: &[String]) -> Result<Vec<Vec<f64>>> {
        let endpoint = format!("{}/embeddings", self.base_url);
        let mut request = self
            .agent
            .post(&endpoint)
            .set("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }
        let response = request.send_json(json!({
            "model": self.model,
            "input": inputs,
        }))?;
        let parsed: serde_json::Value =
            response.into_json().map_err(|e| GraphQaError::Embedding {
                message: format!("failed to parse embeddings response: {e}"),
            })?;
        let data = parsed["data"]
            .as_array()
            .ok_or_else(|| GraphQaError::Embedding {
                message: "embeddings response lacks data array".to_string(),
            })?;
        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item["embedding"]
                .as_array()
                .ok_or_else(|| GraphQaError::Embedding {
                    message: "embeddings entry lacks embedding array".to_string(),
                })?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0))
                .collect();
            vectors.push(embedding);
        }
        Ok(vectors)
    }
}

impl Embedder for HttpEmbedder {
    fn batch_encode(
        &self,
        texts: &[String],
        instruction: Option<&str>,
        norm: bool,
    ) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs = apply_instruction(texts, instruction);

        let mut last_error = None;
        for attempt in 0..self.max_retry_attempts {
            match self.request_once(&inputs) {
                Ok(mut vectors) => {
                    if vectors.len() != texts.len() {
                        return Err(GraphQaError::Embedding {
                            message: format!(
                                "embedding endpoint returned {} vectors for {} inputs",
                                vectors.len(),
                                texts.len()
                            ),
                        });
                    }
                    if norm {
                        for vector in &mut vectors {
                            l2_normalize(vector);
                        }
                    }
                    return Ok(vectors);
                },
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "embedding request failed");
                    last_error = Some(e);
                    if attempt + 1 < self.max_retry_attempts {
                        std::thread::sleep(backoff_delay(attempt));
                    }
                },
            }
        }
        Err(GraphQaError::Embedding {
            message: format!(
                "embedding request failed after {} attempts: {}",
                self.max_retry_attempts,
                last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
        })
    }
}

/// Deterministic local embedder.
///
/// Each coordinate is derived from the MD5 digest of the input text plus a
/// block counter, mapped into [-1, 1]. Not semantically meaningful, but
/// stable across processes, which is what offline runs and tests need.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create an embedder producing vectors of `dimension`
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode_one(&self, text: &str) -> Vec<f64> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut block = 0u32;
        while vector.len() < self.dimension {
            let mut hasher = Md5::new();
            hasher.update(text.as_bytes());
            hasher.update(block.to_le_bytes());
            let digest = hasher.finalize();
            for byte in digest.iter() {
                if vector.len() == self.dimension {
                    break;
                }
                vector.push(*byte as f64 / 127.5 - 1.0);
            }
            block += 1;
        }
        vector
    }
}

impl Embedder for HashEmbedder {
    fn batch_encode(
        &self,
        texts: &[String],
        instruction: Option<&str>,
        norm: bool,
    ) -> Result<Vec<Vec<f64>>> {
        let inputs = apply_instruction(texts, instruction);
        let mut vectors: Vec<Vec<f64>> = inputs.iter().map(|t| self.encode_one(t)).collect();
        if norm {
            for vector in &mut vectors {
                l2_normalize(vector);
            }
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(32);
        let a = embedder
            .batch_encode(&["hello".to_string()], None, true)
            .unwrap();
        let b = embedder
            .batch_encode(&["hello".to_string()], None, true)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_embedder_normalized() {
        let embedder = HashEmbedder::new(16);
        let out = embedder
            .batch_encode(&["anything".to_string()], None, true)
            .unwrap();
        let norm: f64 = out[0].iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_instruction_changes_vector() {
        let embedder = HashEmbedder::new(16);
        let plain = embedder
            .batch_encode(&["q".to_string()], None, true)
            .unwrap();
        let instructed = embedder
            .batch_encode(&["q".to_string()], Some("find facts:"), true)
            .unwrap();
        assert_ne!(plain, instructed);
    }

    #[test]
    fn test_config_dispatch() {
        let config = EmbeddingConfig {
            name: LOCAL_HASH_EMBEDDER.to_string(),
            ..Default::default()
        };
        let embedder = embedder_from_config(&config).unwrap();
        let out = embedder
            .batch_encode(&["x".to_string()], None, false)
            .unwrap();
        assert_eq!(out[0].len(), config.dimension);
    }
}
