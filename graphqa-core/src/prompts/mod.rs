//! Prompt template registry.
//!
//! Chat templates are a system message, optional few-shot demo turns, and a
//! user template with `{placeholder}` slots. The registry ships compiled
//! defaults for NER, triple extraction, fact filtering, and QA; the fact
//! filter's system message and demos can be overridden from a JSON file
//! produced by a prompt-optimization run.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::traits::ChatMessage;
use crate::core::Result;

/// One few-shot demonstration: a user turn and the assistant's reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoTurn {
    /// User-side demo content
    pub user: String,
    /// Assistant-side demo content
    pub assistant: String,
}

/// A chat prompt template
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    /// Optional system message
    pub system: Option<String>,
    /// Few-shot demo turns inserted between system and the live user turn
    pub demos: Vec<DemoTurn>,
    /// User message template with `{placeholder}` slots
    pub user_template: String,
}

impl ChatTemplate {
    /// Render the template into a chat prompt, substituting `vars` into the
    /// user template.
    pub fn render(&self, vars: &[(&str, &str)]) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        for demo in &self.demos {
            messages.push(ChatMessage::user(demo.user.clone()));
            messages.push(ChatMessage::assistant(demo.assistant.clone()));
        }
        let mut user = self.user_template.clone();
        for (key, value) in vars {
            user = user.replace(&format!("{{{key}}}"), value);
        }
        messages.push(ChatMessage::user(user));
        messages
    }
}

/// On-disk format of a compiled fact-filter prompt: optional system message
/// plus question/fact demo triples.
#[derive(Debug, Deserialize)]
struct CompiledFilterFile {
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    demos: Vec<CompiledFilterDemo>,
}

#[derive(Debug, Deserialize)]
struct CompiledFilterDemo {
    question: String,
    fact_before_filter: String,
    fact_after_filter: String,
}

/// Named collection of chat templates
pub struct PromptRegistry {
    templates: HashMap<String, ChatTemplate>,
}

impl PromptRegistry {
    /// Registry with the compiled default templates
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert("ner".to_string(), ner_template());
        templates.insert("triple_extraction".to_string(), triple_template());
        templates.insert("rerank_fact_filter".to_string(), fact_filter_template());
        templates.insert("rag_qa_musique".to_string(), rag_qa_template());
        Self { templates }
    }

    /// Whether a template with this name exists
    pub fn has(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Look up a template by name
    pub fn get(&self, name: &str) -> Option<&ChatTemplate> {
        self.templates.get(name)
    }

    /// Render a named template; unknown names fall through to `fallback`.
    pub fn render(
        &self,
        name: &str,
        fallback: &str,
        vars: &[(&str, &str)],
    ) -> Vec<ChatMessage> {
        let template = self
            .templates
            .get(name)
            .or_else(|| self.templates.get(fallback))
            .expect("fallback template must be registered");
        template.render(vars)
    }

    /// Replace the fact-filter system message and demos with a compiled
    /// prompt file.
    pub fn load_fact_filter_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let compiled: CompiledFilterFile = serde_json::from_str(&raw)?;
        let mut template = fact_filter_template();
        if let Some(system) = compiled.system {
            template.system = Some(system);
        }
        if !compiled.demos.is_empty() {
            template.demos = compiled
                .demos
                .into_iter()
                .map(|d| DemoTurn {
                    user: format!("Question: {}\nCandidate facts: {}", d.question, d.fact_before_filter),
                    assistant: d.fact_after_filter,
                })
                .collect();
        }
        self.templates
            .insert("rerank_fact_filter".to_string(), template);
        Ok(())
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn ner_template() -> ChatTemplate {
    ChatTemplate {
        system: Some(
            "You are a named entity extractor. Given a passage, list every named \
             entity it mentions. Respond with a JSON object of the form \
             {\"named_entities\": [\"entity1\", \"entity2\", ...]} and nothing else."
                .to_string(),
        ),
        demos: vec![DemoTurn {
            user: "Radio City is India's first private FM radio station and was started on 3 July 2001."
                .to_string(),
            assistant: "{\"named_entities\": [\"Radio City\", \"India\", \"3 July 2001\"]}"
                .to_string(),
        }],
        user_template: "{passage}".to_string(),
    }
}

fn triple_template() -> ChatTemplate {
    ChatTemplate {
        system: Some(
            "You are an open information extractor. Given a passage and the named \
             entities found in it, extract relational triples connecting those \
             entities. Respond with a JSON object of the form \
             {\"triples\": [[\"subject\", \"predicate\", \"object\"], ...]} and \
             nothing else. Every triple must have exactly three elements."
                .to_string(),
        ),
        demos: vec![DemoTurn {
            user: "Passage:\nRadio City is India's first private FM radio station and was started on 3 July 2001.\n\nNamed entities: [\"Radio City\", \"India\", \"3 July 2001\"]"
                .to_string(),
            assistant: "{\"triples\": [[\"Radio City\", \"located in\", \"India\"], [\"Radio City\", \"started on\", \"3 July 2001\"]]}"
                .to_string(),
        }],
        user_template: "Passage:\n{passage}\n\nNamed entities: {named_entities}".to_string(),
    }
}

fn fact_filter_template() -> ChatTemplate {
    ChatTemplate {
        system: Some(
            "You are given a question and a set of candidate facts, each a \
             [subject, predicate, object] triple. Select only the facts that are \
             useful for answering the question. Respond with a JSON object of the \
             form {\"fact\": [[\"subject\", \"predicate\", \"object\"], ...]} \
             containing the selected facts and nothing else. If no fact is useful, \
             respond with {\"fact\": []}."
                .to_string(),
        ),
        demos: vec![DemoTurn {
            user: "Question: Which country is the capital city of Paris located in?\nCandidate facts: {\"fact\": [[\"paris\", \"capital of\", \"france\"], [\"berlin\", \"capital of\", \"germany\"]]}"
                .to_string(),
            assistant: "{\"fact\": [[\"paris\", \"capital of\", \"france\"]]}".to_string(),
        }],
        user_template: "Question: {question}\nCandidate facts: {facts}".to_string(),
    }
}

fn rag_qa_template() -> ChatTemplate {
    ChatTemplate {
        system: Some(
            "You answer questions using the provided Wikipedia passages. Think \
             step by step, then finish with a line of the form `Answer: <short \
             answer>`. Keep the final answer as short as possible."
                .to_string(),
        ),
        demos: vec![DemoTurn {
            user: "Wikipedia Title: France\n\nParis is the capital and largest city of France.\n\nQuestion: What is the capital of France?\nThought: ".to_string(),
            assistant: "The passage states that Paris is the capital of France.\nAnswer: Paris"
                .to_string(),
        }],
        user_template: "{context}Question: {question}\nThought: ".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_vars() {
        let registry = PromptRegistry::new();
        let messages = registry.render(
            "ner",
            "ner",
            &[("passage", "Berlin is in Germany.")],
        );
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages.last().unwrap().content, "Berlin is in Germany.");
        // one demo pair between system and live user turn
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn test_unknown_name_falls_back() {
        let registry = PromptRegistry::new();
        let messages = registry.render(
            "rag_qa_hotpotqa",
            "rag_qa_musique",
            &[("context", ""), ("question", "Q?")],
        );
        assert!(messages.last().unwrap().content.contains("Q?"));
    }

    #[test]
    fn test_load_fact_filter_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compiled.json");
        std::fs::write(
            &path,
            r#"{"system": "Filter facts carefully.",
                "demos": [{"question": "Who?",
                           "fact_before_filter": "{\"fact\": [[\"a\",\"b\",\"c\"]]}",
                           "fact_after_filter": "{\"fact\": []}"}]}"#,
        )
        .unwrap();
        let mut registry = PromptRegistry::new();
        registry.load_fact_filter_file(&path).unwrap();
        let template = registry.get("rerank_fact_filter").unwrap();
        assert_eq!(template.system.as_deref(), Some("Filter facts carefully."));
        assert_eq!(template.demos.len(), 1);
    }
}
