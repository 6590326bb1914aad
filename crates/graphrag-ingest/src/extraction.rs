//! Extraction output parser
//!
//! Turns one raw completion into triples. The expected shape is the one the
//! extraction prompt asks for:
//!
//! ```text
//! Entities:
//! - GraphRAG: graph-based retrieval augmented generation
//! - RAG
//!
//! Relationships:
//! - GraphRAG -> extends -> RAG
//! 2) **RAG** -> fails at -> "global questions"
//! ```
//!
//! Models drift from it constantly, so the parser is tolerant: any bullet or
//! ordinal prefix, any casing of the headers, decoration around names. A line
//! that still cannot be read is counted and dropped. Parsing never fails.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use graphrag_graph::{clean_surface, EntityMention, Triple};

/// Structured result of parsing one completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    /// Relationship triples in input order.
    pub triples: Vec<Triple>,
    /// Standalone entity lines in input order.
    pub entities: Vec<EntityMention>,
    /// Non-blank lines seen.
    pub total_lines: usize,
    /// Non-blank, non-header lines that yielded nothing.
    pub skipped_lines: usize,
}

impl Extraction {
    /// A non-empty completion that produced no triples.
    pub fn is_yield_zero(&self) -> bool {
        self.total_lines > 0 && self.triples.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Entities,
    Relationships,
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*•+]\s+|\(?\d{1,3}[.)]\s+)").expect("bullet pattern is valid")
    })
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*#*\s*\**\s*(entities|relationships|relations)\s*\**\s*:?\s*\**\s*$")
            .expect("header pattern is valid")
    })
}

fn arrow_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-+>|→").expect("arrow pattern is valid"))
}

/// Parse one completion. See the module docs for the accepted shapes.
pub fn parse_extraction(completion: &str) -> Extraction {
    let mut out = Extraction::default();
    let mut section = Section::None;

    for line in completion.lines() {
        if line.trim().is_empty() {
            continue;
        }
        out.total_lines += 1;

        if let Some(caps) = header_re().captures(line) {
            section = if caps[1].eq_ignore_ascii_case("entities") {
                Section::Entities
            } else {
                Section::Relationships
            };
            continue;
        }

        let prefix = prefix_re().find(line);
        let body = prefix.map_or(line, |m| &line[m.end()..]).trim();

        if arrow_re().is_match(body) {
            match parse_triple(body) {
                Some(triple) => out.triples.push(triple),
                None => out.skipped_lines += 1,
            }
        } else if section == Section::Entities && prefix.is_some() {
            match parse_entity(body) {
                Some(mention) => out.entities.push(mention),
                None => out.skipped_lines += 1,
            }
        } else {
            out.skipped_lines += 1;
        }
    }

    tracing::trace!(
        triples = out.triples.len(),
        entities = out.entities.len(),
        total_lines = out.total_lines,
        skipped_lines = out.skipped_lines,
        "parsed extraction"
    );
    out
}

fn parse_triple(body: &str) -> Option<Triple> {
    let parts: Vec<String> = arrow_re().split(body).map(clean_surface).collect();
    match parts.as_slice() {
        [source, label, target] if !source.is_empty() && !label.is_empty() && !target.is_empty() => {
            Some(Triple::new(source.as_str(), label.as_str(), target.as_str()))
        }
        _ => None,
    }
}

fn parse_entity(body: &str) -> Option<EntityMention> {
    let (name, description) = match body.split_once(':').or_else(|| body.split_once(" - ")) {
        Some((name, desc)) => (clean_surface(name), Some(clean_surface(desc))),
        None => (clean_surface(body), None),
    };
    if name.is_empty() {
        return None;
    }
    Some(EntityMention {
        name,
        description: description.filter(|d| !d.is_empty()),
    })
}
