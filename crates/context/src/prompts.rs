//! Prompt builders for every pipeline stage
//!
//! Pure functions: no I/O, no trace access.

use crate::session::Turn;
use std::fmt::Write;
use wizsearch_common::retrieval::Passage;

/// Render history as `role: content` lines
fn format_history(history: &[Turn]) -> String {
    history
        .iter()
        .map(|turn| format!("{}: {}", turn.role.as_str(), turn.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Classify a raw user message
pub fn intent(query: &str) -> String {
    format!(
        "Classify the intent of the user's message.\n\
         If the message is a question or request that needs information looked up, \
         reply with exactly: valid_query\n\
         Otherwise reply with a short snake_case label describing it, for example: \
         greeting, thanks, chit_chat, unclear.\n\
         Reply with the label only.\n\n\
         Message: {}",
        query.trim()
    )
}

/// Rewrite the latest user message so it no longer depends on the conversation
pub fn standalone_query(history: &[Turn]) -> String {
    format!(
        "Rewrite the latest user question as a standalone question that can be \
         understood without the conversation.\n\
         Resolve pronouns and references using the conversation. Do not answer it. \
         Reply with the question only.\n\n\
         Conversation:\n{}",
        format_history(history)
    )
}

/// Turn a question into a keyword-dense search query
pub fn query_formatting(query: &str) -> String {
    format!(
        "Convert the question into a concise search engine query.\n\
         Keep the key entities and terms, drop filler words and conversational phrasing. \
         Reply with the query only.\n\n\
         Question: {}",
        query.trim()
    )
}

/// Ask for follow-up questions as a JSON array
pub fn followup_query(query: &str) -> String {
    format!(
        "Suggest follow-up questions a curious user might ask next about the topic below.\n\
         Reply with a JSON array of 3 short questions and nothing else.\n\n\
         Topic: {}",
        query.trim()
    )
}

/// Answer from retrieved passages, numbered for inline citation
pub fn grounded_answer(passages: &[Passage], history: &[Turn]) -> String {
    let mut context = String::new();
    for (i, passage) in passages.iter().enumerate() {
        let title = passage.title.as_deref().unwrap_or("Untitled");
        // Writing into a String cannot fail
        let _ = writeln!(
            context,
            "[{}] {} ({})\n{}\n",
            i + 1,
            title,
            passage.source_id,
            passage.content.trim()
        );
    }

    format!(
        "Answer the user's question using only the search results below.\n\
         Cite sources inline as [n] matching the numbered results. \
         If the results do not contain the answer, say so.\n\n\
         Search results:\n{}\n\
         Conversation:\n{}\n\
         assistant:",
        context,
        format_history(history)
    )
}

/// Reply to a message that needs no search
pub fn ungrounded_answer(intent: &str, query: &str) -> String {
    format!(
        "Respond to the user's message. It was classified as: {}.\n\
         Be brief and friendly. If the message is unclear, ask what they would like \
         to search for.\n\n\
         Message: {}",
        intent,
        query.trim()
    )
}
