//! Combining per-store answers into one reply.

use askgate_core::types::GroundingChunk;

use crate::retrieval::RetrievalAnswer;

/// One store's successful contribution to a reply.
#[derive(Debug, Clone)]
pub struct StoreAnswer {
    pub store: String,
    pub question: String,
    pub answer: RetrievalAnswer,
}

/// Merge answers in order.
///
/// A single answer is returned verbatim. Several are rendered as
/// `**store**\nanswer` sections separated by a blank line.
pub fn merge_answers(answers: &[StoreAnswer]) -> String {
    match answers {
        [] => String::new(),
        [only] => only.answer.answer_text.clone(),
        many => many
            .iter()
            .map(|a| format!("**{}**\n{}", a.store, a.answer.answer_text))
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

/// Concatenate every answer's grounding, preserving store order.
pub fn flatten_grounding(answers: &[StoreAnswer]) -> Vec<GroundingChunk> {
    answers
        .iter()
        .flat_map(|a| a.answer.grounding.iter().cloned())
        .collect()
}
