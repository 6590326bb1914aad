//! Single-writer merge of extraction output into a [`KnowledgeGraph`].
//!
//! `ingest` is a commutative, associative fold: batches may arrive from
//! chunks in any order and the resulting graph has the same
//! [`signature`](KnowledgeGraph::signature). Only display surface forms
//! (first seen wins) depend on arrival order.

use serde::{Deserialize, Serialize};

use crate::model::KnowledgeGraph;
use crate::normalize_key;

/// A raw `(entityA, label, entityB)` triple as recovered from a completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub source: String,
    pub label: String,
    pub target: String,
}

impl Triple {
    pub fn new(source: impl Into<String>, label: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            label: label.into(),
            target: target.into(),
        }
    }
}

/// An entity listed on its own (`- Name: description`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityMention {
    pub name: String,
    pub description: Option<String>,
}

/// Counters for one `ingest` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub triples: usize,
    pub accepted: usize,
    pub self_loops: usize,
    pub incomplete: usize,
    pub new_entities: usize,
    pub new_relationships: usize,
}

impl IngestStats {
    pub fn merge(&mut self, other: IngestStats) {
        self.triples += other.triples;
        self.accepted += other.accepted;
        self.self_loops += other.self_loops;
        self.incomplete += other.incomplete;
        self.new_entities += other.new_entities;
        self.new_relationships += other.new_relationships;
    }
}

/// Owns the graph under construction. There is exactly one builder per
/// indexing run; concurrent producers hand it batches through a queue.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: KnowledgeGraph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue building on top of an existing graph.
    pub fn from_graph(graph: KnowledgeGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn finish(self) -> KnowledgeGraph {
        self.graph
    }

    /// Fold a batch of triples into the graph.
    ///
    /// - endpoints are created on first sighting (stub nodes)
    /// - the same unordered pair accumulates weight and labels
    /// - self-loops and triples with an empty part are dropped
    pub fn ingest(&mut self, triples: &[Triple]) -> IngestStats {
        let mut stats = IngestStats {
            triples: triples.len(),
            ..IngestStats::default()
        };

        for triple in triples {
            let source_key = normalize_key(&triple.source);
            let target_key = normalize_key(&triple.target);
            let label = crate::clean_surface(&triple.label);
            if source_key.is_empty() || target_key.is_empty() || label.is_empty() {
                stats.incomplete += 1;
                continue;
            }
            if source_key == target_key {
                stats.self_loops += 1;
                continue;
            }

            let Some((from, from_new)) = self.graph.upsert_entity(&triple.source) else {
                stats.incomplete += 1;
                continue;
            };
            let Some((to, to_new)) = self.graph.upsert_entity(&triple.target) else {
                stats.incomplete += 1;
                continue;
            };
            stats.new_entities += usize::from(from_new) + usize::from(to_new);
            self.graph.entity_mut(from).mentions += 1;
            self.graph.entity_mut(to).mentions += 1;

            if self
                .graph
                .upsert_relationship(from, to, label.to_lowercase(), label)
            {
                stats.new_relationships += 1;
            }
            stats.accepted += 1;
        }

        tracing::debug!(
            triples = stats.triples,
            accepted = stats.accepted,
            self_loops = stats.self_loops,
            incomplete = stats.incomplete,
            "ingested triple batch"
        );
        stats
    }

    /// Fold standalone entity mentions (creating isolated nodes if needed).
    /// Returns the number of entities created.
    pub fn ingest_entities(&mut self, mentions: &[EntityMention]) -> usize {
        let mut created = 0;
        for mention in mentions {
            let Some((id, is_new)) = self.graph.upsert_entity(&mention.name) else {
                continue;
            };
            created += usize::from(is_new);
            let entity = self.graph.entity_mut(id);
            entity.mentions += 1;
            if let Some(desc) = &mention.description {
                entity.add_description(desc);
            }
        }
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(a: &str, l: &str, b: &str) -> Triple {
        Triple::new(a, l, b)
    }

    #[test]
    fn identical_triple_twice_gives_weight_two() {
        let mut b = GraphBuilder::new();
        b.ingest(&[t("GraphRAG", "extends", "RAG")]);
        b.ingest(&[t("GraphRAG", "extends", "RAG")]);
        let g = b.finish();
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
        let rel = g.relationship_between("graphrag", "rag").unwrap();
        assert_eq!(rel.weight, 2);
        assert_eq!(rel.labels.len(), 1);
        assert_eq!(rel.labels[0].count, 2);
    }

    #[test]
    fn labels_accumulate_instead_of_overwriting() {
        let mut b = GraphBuilder::new();
        b.ingest(&[t("Leiden", "solves", "Resolution limit"), t("leiden", "extends", "Louvain")]);
        b.ingest(&[t("LEIDEN", "Extends", "resolution LIMIT")]);
        let g = b.finish();
        let rel = g.relationship_between("Leiden", "Resolution limit").unwrap();
        assert_eq!(rel.weight, 2);
        let labels: Vec<&str> = rel.labels.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(labels, vec!["solves", "Extends"]);
    }

    #[test]
    fn first_seen_surface_form_is_kept() {
        let mut b = GraphBuilder::new();
        b.ingest(&[t("  GraphRAG ", "uses", "community detection")]);
        b.ingest(&[t("graphrag", "uses", "Community   Detection")]);
        let g = b.finish();
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.entity_by_name("GRAPHRAG").unwrap().name, "GraphRAG");
        assert_eq!(
            g.entity_by_name("community detection").unwrap().name,
            "community detection"
        );
    }

    #[test]
    fn self_loops_and_incomplete_triples_are_dropped() {
        let mut b = GraphBuilder::new();
        let stats = b.ingest(&[
            t("RAG", "is", "rag"),
            t("", "uses", "X"),
            t("A", "  ", "B"),
            t("A", "links", "B"),
        ]);
        assert_eq!(stats.self_loops, 1);
        assert_eq!(stats.incomplete, 2);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.new_entities, 2);
        assert_eq!(b.graph().node_count(), 2);
    }

    #[test]
    fn reversed_pair_merges_into_one_edge() {
        let mut b = GraphBuilder::new();
        b.ingest(&[t("A", "cites", "B"), t("B", "cited by", "A")]);
        let g = b.finish();
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.relationships()[0].weight, 2);
    }

    #[test]
    fn entity_mentions_create_isolated_nodes_with_descriptions() {
        let mut b = GraphBuilder::new();
        let created = b.ingest_entities(&[
            EntityMention {
                name: "Modularity".into(),
                description: Some("partition quality score".into()),
            },
            EntityMention {
                name: "modularity".into(),
                description: Some("objective of Louvain".into()),
            },
        ]);
        assert_eq!(created, 1);
        let g = b.finish();
        let e = g.entity_by_name("MODULARITY").unwrap();
        assert_eq!(e.mentions, 2);
        assert_eq!(e.descriptions.len(), 2);
        assert_eq!(g.edge_count(), 0);
    }
}
