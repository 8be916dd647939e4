//! Token estimation heuristics used where no real usage figure is available
//! from the embedding/LLM endpoint. Formulas are bit-for-bit ports of
//! `original_source/server/app/api/query.py` and
//! `original_source/worker/jobs/ingest_index.py`.

use crate::database::models::RetrievedChunk;

/// Prompt scaffolding overhead added on top of the raw context tokens
/// (`original_source/server/app/api/query.py::PROMPT_TEMPLATE_TOKENS`).
pub const PROMPT_TEMPLATE_TOKENS: i64 = 200;

pub fn estimate_query_tokens(question: &str) -> i64 {
    ((question.len() as f64 / 4.0) * 1.3).ceil() as i64
}

pub fn estimate_embedding_tokens(text: &str) -> i64 {
    (((text.len() as f64 / 4.0) * 1.1).ceil() as i64).max(1)
}

pub fn estimate_llm_input_tokens(question: &str, chunks: &[RetrievedChunk]) -> i64 {
    let context_tokens: i64 = chunks.iter().map(|c| c.token_count as i64).sum();
    (context_tokens as f64 + PROMPT_TEMPLATE_TOKENS as f64 + (question.len() as f64 / 4.0)).ceil() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_token_estimate_matches_formula() {
        let question = "a".repeat(40);
        assert_eq!(estimate_query_tokens(&question), 13);
    }

    #[test]
    fn embedding_token_estimate_has_a_floor_of_one() {
        assert_eq!(estimate_embedding_tokens(""), 1);
        assert_eq!(estimate_embedding_tokens("a"), 1);
    }

    #[test]
    fn llm_input_estimate_adds_template_overhead() {
        let chunks: Vec<RetrievedChunk> = vec![];
        let question = "a".repeat(20);
        assert_eq!(estimate_llm_input_tokens(&question, &chunks), PROMPT_TEMPLATE_TOKENS + 5);
    }
}
