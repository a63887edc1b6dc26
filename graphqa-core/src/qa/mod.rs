//! QA prompt assembly and answer parsing, plus the retrieve → answer →
//! evaluate pipeline.

use crate::core::{QuerySolution, Result};
use crate::evaluation::{evaluate_answers, QaMetrics};
use crate::GraphQa;

/// Everything after the literal `Answer:` marker, trimmed; the whole
/// response when the marker is absent.
pub fn extract_answer(response: &str) -> String {
    match response.find("Answer:") {
        Some(pos) => response[pos + "Answer:".len()..].trim().to_string(),
        None => response.trim().to_string(),
    }
}

/// One passage block in the QA context
fn context_block(doc: &str) -> String {
    format!("Wikipedia Title: {doc}\n\n")
}

impl GraphQa {
    /// Answer each solution's question from its top-ranked passages.
    ///
    /// Per-query failures do not abort the batch; the failed solution keeps
    /// `answer: None`.
    pub fn qa(&mut self, mut solutions: Vec<QuerySolution>) -> Result<Vec<QuerySolution>> {
        let template_name = format!("rag_qa_{}", self.config.dataset);
        let top_k = self.config.retrieval.qa_top_k;

        for solution in &mut solutions {
            let context: String = solution.docs.iter().take(top_k).map(|d| context_block(d)).collect();
            let messages = self.prompts.render(
                &template_name,
                "rag_qa_musique",
                &[("context", context.as_str()), ("question", solution.question.as_str())],
            );
            match self.llm.infer(&messages) {
                Ok(reply) => {
                    solution.answer = Some(extract_answer(&reply.response));
                },
                Err(e) => {
                    tracing::warn!(question = %solution.question, error = %e, "qa call failed");
                    solution.answer = None;
                },
            }
        }
        Ok(solutions)
    }

    /// Full pipeline: retrieve, answer, and (when golds are given) evaluate.
    ///
    /// `gold_docs` / `gold_answers` align with `queries` when present.
    pub fn rag_qa(
        &mut self,
        queries: &[String],
        gold_docs: Option<&[Vec<String>]>,
        gold_answers: Option<&[Vec<String>]>,
    ) -> Result<(Vec<QuerySolution>, Option<QaMetrics>)> {
        let k = self.config.retrieval.qa_top_k;
        let mut solutions = self.retrieve(queries, k)?;

        if let Some(gold_docs) = gold_docs {
            for (solution, golds) in solutions.iter_mut().zip(gold_docs.iter()) {
                solution.gold_docs = Some(golds.clone());
            }
        }
        if let Some(gold_answers) = gold_answers {
            for (solution, golds) in solutions.iter_mut().zip(gold_answers.iter()) {
                solution.gold_answers = Some(golds.clone());
            }
        }

        let solutions = self.qa(solutions)?;

        let metrics = gold_answers.map(|_| {
            let pairs: Vec<(Option<&[String]>, Option<&str>)> = solutions
                .iter()
                .map(|s| (s.gold_answers.as_deref(), s.answer.as_deref()))
                .collect();
            evaluate_answers(&pairs)
        });
        Ok((solutions, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_answer_with_marker() {
        assert_eq!(
            extract_answer("Thought: It is Paris.\nAnswer: Paris"),
            "Paris"
        );
    }

    #[test]
    fn test_extract_answer_without_marker() {
        assert_eq!(extract_answer("just Paris"), "just Paris");
    }

    #[test]
    fn test_context_block_shape() {
        assert_eq!(context_block("doc text"), "Wikipedia Title: doc text\n\n");
    }
}
