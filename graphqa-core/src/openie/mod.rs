//! LLM-driven open information extraction.
//!
//! The reference extractor renders the `ner` template for each chunk, then
//! the `triple_extraction` template seeded with the entities it found.
//! Malformed model output is a content error: logged, replaced with empty
//! results, and never fatal to the batch.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::core::traits::{LanguageModel, NerOutput, OpenIe, TripleOutput};
use crate::core::Result;
use crate::prompts::PromptRegistry;

/// Extractor driving the NER and triple-extraction prompts through the LLM.
pub struct LlmOpenIe {
    llm: Arc<dyn LanguageModel>,
    prompts: PromptRegistry,
}

impl LlmOpenIe {
    /// Build the extractor around a language model
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            prompts: PromptRegistry::new(),
        }
    }

    fn extract_entities(&self, chunk_id: &str, passage: &str) -> NerOutput {
        let messages = self.prompts.render("ner", "ner", &[("passage", passage)]);
        match self.llm.infer(&messages) {
            Ok(reply) => {
                let entities = parse_string_array(&reply.response, "named_entities");
                if entities.is_empty() {
                    tracing::warn!(chunk_id, "NER response contained no parseable entities");
                }
                NerOutput {
                    chunk_id: chunk_id.to_string(),
                    response: Some(reply.response),
                    unique_entities: dedupe(entities),
                    metadata: reply.metadata,
                }
            },
            Err(e) => {
                tracing::warn!(chunk_id, error = %e, "NER extraction failed");
                NerOutput {
                    chunk_id: chunk_id.to_string(),
                    response: None,
                    unique_entities: Vec::new(),
                    metadata: IndexMap::new(),
                }
            },
        }
    }

    fn extract_triples(&self, chunk_id: &str, passage: &str, entities: &[String]) -> TripleOutput {
        let entities_json = serde_json::to_string(entities).unwrap_or_else(|_| "[]".to_string());
        let messages = self.prompts.render(
            "triple_extraction",
            "triple_extraction",
            &[("passage", passage), ("named_entities", &entities_json)],
        );
        match self.llm.infer(&messages) {
            Ok(reply) => {
                let triples = parse_triple_array(&reply.response, "triples");
                if triples.is_empty() {
                    tracing::warn!(chunk_id, "triple response contained no parseable triples");
                }
                TripleOutput {
                    chunk_id: chunk_id.to_string(),
                    response: Some(reply.response),
                    triples,
                    metadata: reply.metadata,
                }
            },
            Err(e) => {
                tracing::warn!(chunk_id, error = %e, "triple extraction failed");
                TripleOutput {
                    chunk_id: chunk_id.to_string(),
                    response: None,
                    triples: Vec::new(),
                    metadata: IndexMap::new(),
                }
            },
        }
    }
}

impl OpenIe for LlmOpenIe {
    fn batch_openie(
        &self,
        chunks: &IndexMap<String, String>,
    ) -> Result<(HashMap<String, NerOutput>, HashMap<String, TripleOutput>)> {
        let mut ner_results = HashMap::with_capacity(chunks.len());
        let mut triple_results = HashMap::with_capacity(chunks.len());
        for (chunk_id, passage) in chunks {
            let ner = self.extract_entities(chunk_id, passage);
            let triples = self.extract_triples(chunk_id, passage, &ner.unique_entities);
            ner_results.insert(chunk_id.clone(), ner);
            triple_results.insert(chunk_id.clone(), triples);
        }
        Ok((ner_results, triple_results))
    }
}

fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Pull the first JSON object out of a model response. Models wrap JSON in
/// prose and code fences often enough that a plain parse is tried first and
/// a balanced-brace scan second.
pub fn extract_json_object(response: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(response.trim()) {
        if value.is_object() {
            return Some(value);
        }
    }
    let starts: Vec<usize> = response
        .char_indices()
        .filter(|&(_, c)| c == '{')
        .map(|(i, _)| i)
        .collect();
    for start in starts {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, c) in response[start..].char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &response[start..=start + offset];
                        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                            if value.is_object() {
                                return Some(value);
                            }
                        }
                        break;
                    }
                },
                _ => {},
            }
        }
    }
    None
}

/// Parse `{"<key>": ["a", "b", ...]}` out of a response, tolerantly.
pub fn parse_string_array(response: &str, key: &str) -> Vec<String> {
    let Some(object) = extract_json_object(response) else {
        return Vec::new();
    };
    object
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse `{"<key>": [["s","p","o"], ...]}` out of a response, tolerantly.
/// Rows are returned raw; length validation happens downstream.
pub fn parse_triple_array(response: &str, key: &str) -> Vec<Vec<String>> {
    let Some(object) = extract_json_object(response) else {
        return Vec::new();
    };
    object
        .get(key)
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.as_array())
                .map(|row| {
                    row.iter()
                        .map(|item| match item {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let entities = parse_string_array(r#"{"named_entities": ["Paris", "France"]}"#, "named_entities");
        assert_eq!(entities, vec!["Paris", "France"]);
    }

    #[test]
    fn test_parse_json_wrapped_in_prose() {
        let response = "Sure! Here you go:\n```json\n{\"triples\": [[\"a\", \"r\", \"b\"]]}\n```\nDone.";
        let triples = parse_triple_array(response, "triples");
        assert_eq!(triples, vec![vec!["a".to_string(), "r".to_string(), "b".to_string()]]);
    }

    #[test]
    fn test_parse_garbage_is_empty() {
        assert!(parse_string_array("no json here", "named_entities").is_empty());
        assert!(parse_triple_array("{\"other\": 1}", "triples").is_empty());
    }

    #[test]
    fn test_non_string_triple_items_stringified() {
        let triples = parse_triple_array(r#"{"triples": [["a", "born in", 1960]]}"#, "triples");
        assert_eq!(triples[0][2], "1960");
    }
}
