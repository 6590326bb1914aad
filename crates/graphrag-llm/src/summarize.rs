//! Community summarization
//!
//! One generation call per community. The prompt carries only the
//! community's own entities and the relationships with both endpoints
//! inside it:
//!
//! ```text
//! Entities:
//! - GraphRAG: graph-based RAG
//! - RAG
//!
//! Relationships:
//! - GraphRAG -> extends, builds on -> RAG
//! ```
//!
//! Rendered data is bounded by `max_input_chars`. Over budget, descriptions
//! are shortened first, then relationships are kept heaviest first (ties by
//! discovery order) and an omission note is appended.

use std::collections::BTreeMap;
use std::sync::Arc;

use graphrag_graph::{
    Community, CommunitySummaryRecord, CommunitySummarySet, GraphError, KnowledgeGraph,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::SummarizationConfig;
use crate::error::GenerationError;
use crate::generation::{GenerationRequest, TextGenerator};
use crate::prompts::summary_prompt;

/// Descriptions are cut to this many characters once the budget is exceeded.
const TRUNCATED_DESCRIPTION_CHARS: usize = 120;
/// Space kept free for the omission note.
const NOTE_RESERVE_CHARS: usize = 100;

const ENTITIES_HEADER: &str = "Entities:";
const RELATIONSHIPS_HEADER: &str = "Relationships:";

/// Community data as it goes into the summary prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommunity {
    pub text: String,
    pub entities_omitted: usize,
    pub relationships_omitted: usize,
}

impl RenderedCommunity {
    pub fn is_truncated(&self) -> bool {
        self.entities_omitted > 0 || self.relationships_omitted > 0
    }
}

/// Render `community` within `max_chars` characters (plus the omission note).
pub fn render_community(
    community: &Community,
    graph: &KnowledgeGraph,
    max_chars: usize,
) -> RenderedCommunity {
    let mut relationships = graph.relationships_within(&community.members);
    relationships.sort_by(|(ia, a), (ib, b)| b.weight.cmp(&a.weight).then(ia.cmp(ib)));
    let relationship_blocks: Vec<Vec<String>> = relationships
        .iter()
        .map(|(_, rel)| {
            rel.render_lines(graph)
                .into_iter()
                .map(|line| format!("- {line}"))
                .collect()
        })
        .collect();

    let full_entities = entity_lines(community, graph, None);
    let full = assemble(&full_entities, relationship_blocks.iter().flatten());
    if char_len(&full) <= max_chars {
        return RenderedCommunity {
            text: full,
            entities_omitted: 0,
            relationships_omitted: 0,
        };
    }

    let budget = max_chars.saturating_sub(NOTE_RESERVE_CHARS);
    let mut used = char_len(ENTITIES_HEADER) + char_len(RELATIONSHIPS_HEADER) + 3;

    let mut kept_entities = Vec::new();
    let mut entities_omitted = 0;
    for line in entity_lines(community, graph, Some(TRUNCATED_DESCRIPTION_CHARS)) {
        let cost = char_len(&line) + 1;
        if used + cost <= budget {
            used += cost;
            kept_entities.push(line);
        } else {
            entities_omitted += 1;
        }
    }

    let mut kept_relationships: Vec<&String> = Vec::new();
    let mut relationships_omitted = 0;
    for block in &relationship_blocks {
        let cost: usize = block.iter().map(|l| char_len(l) + 1).sum();
        if used + cost <= budget {
            used += cost;
            kept_relationships.extend(block);
        } else {
            relationships_omitted += 1;
        }
    }

    let mut text = assemble(&kept_entities, kept_relationships.into_iter());
    if entities_omitted > 0 || relationships_omitted > 0 {
        text.push_str(&format!(
            "\n(Note: {relationships_omitted} relationship(s) and {entities_omitted} entity(ies) omitted to fit the input budget.)"
        ));
    }
    RenderedCommunity {
        text,
        entities_omitted,
        relationships_omitted,
    }
}

fn entity_lines(community: &Community, graph: &KnowledgeGraph, cap: Option<usize>) -> Vec<String> {
    community
        .members
        .iter()
        .filter_map(|&id| graph.entity(id))
        .map(|entity| match (entity.description(), cap) {
            (Some(desc), Some(cap)) => format!("- {}: {}", entity.name, shorten(&desc, cap)),
            (Some(desc), None) => format!("- {}: {desc}", entity.name),
            (None, _) => format!("- {}", entity.name),
        })
        .collect()
}

fn assemble<'a>(entities: &[String], relationships: impl Iterator<Item = &'a String>) -> String {
    let mut text = String::from(ENTITIES_HEADER);
    text.push('\n');
    for line in entities {
        text.push_str(line);
        text.push('\n');
    }
    text.push('\n');
    text.push_str(RELATIONSHIPS_HEADER);
    text.push('\n');
    for line in relationships {
        text.push_str(line);
        text.push('\n');
    }
    text.trim_end().to_string()
}

fn shorten(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}…", s[..i].trim_end()),
        None => s.to_string(),
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ============================================================================
// Summarizer
// ============================================================================

/// Result of summarizing a batch of communities.
#[derive(Debug, Clone)]
pub struct SummaryBatch {
    pub summaries: CommunitySummarySet,
    /// Communities that got the failure placeholder.
    pub failed: Vec<u32>,
}

impl SummaryBatch {
    pub fn all_failed(&self) -> bool {
        !self.summaries.is_empty() && self.failed.len() == self.summaries.len()
    }
}

pub struct CommunitySummarizer {
    generator: Arc<dyn TextGenerator>,
    config: SummarizationConfig,
    temperature: Option<f32>,
}

impl CommunitySummarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: SummarizationConfig) -> Self {
        Self {
            generator,
            config,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn render(&self, community: &Community, graph: &KnowledgeGraph) -> RenderedCommunity {
        render_community(community, graph, self.config.max_input_chars)
    }

    fn request(&self, community: &Community, graph: &KnowledgeGraph) -> GenerationRequest {
        let rendered = self.render(community, graph);
        if rendered.is_truncated() {
            tracing::debug!(
                community = community.id,
                entities_omitted = rendered.entities_omitted,
                relationships_omitted = rendered.relationships_omitted,
                "community data truncated"
            );
        }
        GenerationRequest::new(summary_prompt(&rendered.text))
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.temperature)
    }

    /// Summarize one community; returns the raw completion.
    pub async fn summarize(
        &self,
        community: &Community,
        graph: &KnowledgeGraph,
    ) -> Result<String, GenerationError> {
        self.generator.generate(&self.request(community, graph)).await
    }

    /// Summarize every community with bounded concurrency.
    ///
    /// A failed community gets the configured placeholder and is listed in
    /// [`SummaryBatch::failed`]; it never aborts the batch.
    pub async fn summarize_all(
        &self,
        communities: &[Community],
        graph: &KnowledgeGraph,
    ) -> Result<SummaryBatch, GraphError> {
        tracing::info!(
            communities = communities.len(),
            concurrency = self.config.concurrency,
            generator = %self.generator.describe(),
            "summarizing communities"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for community in communities {
            let request = self.request(community, graph);
            let generator = Arc::clone(&self.generator);
            let semaphore = Arc::clone(&semaphore);
            let id = community.id;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (id, generator.generate(&request).await)
            });
        }

        let mut completed: BTreeMap<u32, Result<String, GenerationError>> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    completed.insert(id, result);
                }
                Err(e) => tracing::warn!(error = %e, "summary task aborted"),
            }
        }

        let mut records = Vec::with_capacity(communities.len());
        let mut failed = Vec::new();
        for community in communities {
            let nodes = community.member_names(graph);
            let placeholder = || self.config.failure_placeholder.clone();
            let record = match completed.remove(&community.id) {
                Some(Ok(text)) => {
                    tracing::debug!(community = community.id, chars = text.len(), "community summarized");
                    CommunitySummaryRecord::new(community.id, nodes, text)
                }
                Some(Err(err)) => {
                    tracing::warn!(community = community.id, error = %err, "failed to summarize community");
                    failed.push(community.id);
                    CommunitySummaryRecord::unavailable(community.id, nodes, placeholder())
                }
                None => {
                    failed.push(community.id);
                    CommunitySummaryRecord::unavailable(community.id, nodes, placeholder())
                }
            };
            records.push(record);
        }

        let summaries = CommunitySummarySet::new(records)?;
        failed.sort_unstable();
        tracing::info!(
            summarized = summaries.len() - failed.len(),
            failed = failed.len(),
            "finished summarizing communities"
        );
        Ok(SummaryBatch { summaries, failed })
    }
}
