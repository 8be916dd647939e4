use crate::database::models::RetrievedChunk;

/// Emitted verbatim by the LLM when the retrieved context cannot support an
/// answer (`original_source/server/app/core/prompts.py`).
pub const INSUFFICIENT_CONTEXT_MESSAGE: &str = "Insufficient context in the provided documents.";

pub fn grounded_system_prompt() -> String {
    format!(
        "You are a strict grounded assistant.\n\
         Rules:\n\
         1) Use only the provided context blocks.\n\
         2) Do not use outside knowledge.\n\
         3) Every factual claim must include citations in format [p<page>|chunk:<chunk_id>].\n\
         4) If the context does not support the answer, output exactly: {INSUFFICIENT_CONTEXT_MESSAGE}\n\
         5) Never fabricate citations."
    )
}

pub fn grounded_user_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let context_blocks: Vec<String> = chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| {
            format!(
                "Context {}\npage: {}\nchunk_id: {}\nchunk_excerpt: {}\nfull_page_text: {}",
                idx + 1,
                chunk.page_number,
                chunk.chunk_id,
                chunk.chunk_text,
                chunk.page_text,
            )
        })
        .collect();

    format!(
        "Question:\n{question}\n\nContext:\n{}\n\n\
         Answer using only the context above. Attach citations for all claims with [p<page>|chunk:<chunk_id>].",
        context_blocks.join("\n\n"),
    )
}
