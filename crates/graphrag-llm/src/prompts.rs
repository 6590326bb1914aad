//! Prompt templates
//!
//! The extraction prompt fixes the line format that
//! [`graphrag_ingest::parse_extraction`] reads back; change both together.

use crate::query::{IntermediateAnswer, MapOutcome};

pub const ENTITY_EXTRACTION_PROMPT: &str = "\
Extract all entities and their relationships from the text.
Respond in the following format, and only this format:

Entities:
- <Entity 1>
- <Entity 2>
...

Relationships:
- <Entity 1> -> <Relationship> -> <Entity 2>
- <Entity 3> -> <Relationship> -> <Entity 4>
...
";

pub const COMMUNITY_SUMMARY_PROMPT: &str = "\
Based on the following entities and relationships from a text community, write a concise, one-paragraph summary that captures the main topic of this community.

Data:
{community_data}

Summary:
";

pub const MAP_PROMPT: &str = "\
You are given a summary of one community of related entities from a document, and a question about the whole document.
Answer the question using only the information in this summary. If the summary contains nothing relevant, say so in one sentence.

Community summary:
{summary}

Question: {query}

Partial answer:
";

pub const REDUCE_PROMPT: &str = "\
You are given partial answers to a question. Each partial answer was written from one community summary of the same document.
Combine them into a single, comprehensive answer. Merge overlapping points, drop partial answers that found nothing relevant, and do not invent information that none of them contains.

Question: {query}

Partial answers:
{answers}

Final answer:
";

/// Placeholder a reduce prompt shows for a community whose map call failed.
pub const FAILED_COMMUNITY_NOTE: &str = "(no answer: the call for this community failed)";

pub fn extraction_prompt(chunk_text: &str) -> String {
    format!("{ENTITY_EXTRACTION_PROMPT}\nText:\n{chunk_text}\n")
}

pub fn summary_prompt(community_data: &str) -> String {
    fill(COMMUNITY_SUMMARY_PROMPT, &[("{community_data}", community_data)])
}

pub fn map_prompt(query: &str, summary: &str) -> String {
    fill(MAP_PROMPT, &[("{summary}", summary), ("{query}", query)])
}

/// `answers` must already be in ascending community-id order.
pub fn reduce_prompt(query: &str, answers: &[IntermediateAnswer]) -> String {
    let mut rendered = String::new();
    for answer in answers {
        let body = match &answer.outcome {
            MapOutcome::Answered(text) => text.trim(),
            MapOutcome::Failed(_) => FAILED_COMMUNITY_NOTE,
        };
        rendered.push_str(&format!("[Community {}]\n{}\n\n", answer.community_id, body));
    }
    fill(REDUCE_PROMPT, &[("{answers}", rendered.trim_end()), ("{query}", query)])
}

/// Single-pass placeholder substitution; substituted text is never rescanned.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(i) = rest.find('{') {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];
        match vars.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
