//! GraphRAG knowledge graph
//!
//! The structural core of the indexing pipeline:
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌─────────────────┐    ┌───────────────┐
//! │  raw triples │───►│ GraphBuilder │───►│ KnowledgeGraph  │───►│ Community     │
//! │  (per chunk) │    │ (one writer) │    │ (dedup, typed)  │    │ Detector      │
//! └──────────────┘    └──────────────┘    └─────────────────┘    │ (Leiden)      │
//!                                                  │             └───────┬───────┘
//!                                                  ▼                     ▼
//!                                         knowledge_graph.json   Vec<Community>
//! ```
//!
//! - `model`: entities, relationships and the graph that owns them
//! - `builder`: the single-writer merge of extraction output into the graph
//! - `community`: modularity-optimizing partition (local move, refinement, aggregation)
//! - `artifact`: durable graph / community-summary files
//!
//! Entity identity is the *normalized key* (see [`normalize_key`]); the
//! first-seen surface form is kept for display.

pub mod artifact;
pub mod builder;
pub mod community;
pub mod error;
pub mod model;

pub use artifact::{
    graph_json, load_graph, save_graph, to_gml, write_atomic, ArtifactBatch,
    CommunitySummaryRecord, CommunitySummarySet, GraphArtifactV1, RelationshipRecordV1,
    GRAPH_ARTIFACT_VERSION,
};
pub use builder::{EntityMention, GraphBuilder, IngestStats, Triple};
pub use community::{Community, CommunityConfig, CommunityDetector, PartitionReport};
pub use error::GraphError;
pub use model::{
    Direction, EdgeLabel, Entity, GraphSignature, KnowledgeGraph, NodeId, Relationship,
};

/// Characters stripped from both ends of names and labels.
///
/// Completions routinely wrap names in markdown emphasis, quotes or the
/// `<Entity>` placeholders of the extraction prompt.
const DECORATION: &[char] = &['"', '\'', '`', '*', '_', '<', '>', '[', ']'];

/// Clean a surface form for display: strip decoration, collapse whitespace.
pub fn clean_surface(raw: &str) -> String {
    let mut s = raw.trim();
    loop {
        let next = s.trim_matches(DECORATION).trim();
        if next.len() == s.len() {
            break;
        }
        s = next;
    }
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identity key for entities, labels and descriptions.
///
/// `"  Graph   RAG "`, `"**graph rag**"` and `"GRAPH RAG"` all map to `"graph rag"`.
pub fn normalize_key(raw: &str) -> String {
    clean_surface(raw).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_folds_case_and_whitespace() {
        assert_eq!(normalize_key("  Graph   RAG "), "graph rag");
        assert_eq!(normalize_key("GRAPH\tRAG"), "graph rag");
        assert_eq!(normalize_key("**GraphRAG**"), "graphrag");
        assert_eq!(normalize_key("<Entity 1>"), "entity 1");
    }

    #[test]
    fn clean_surface_keeps_case_and_inner_punctuation() {
        assert_eq!(clean_surface(" \"global_questions\" "), "global_questions");
        assert_eq!(clean_surface("`Leiden`"), "Leiden");
        assert_eq!(clean_surface("C++ (language)"), "C++ (language)");
        assert_eq!(clean_surface("   "), "");
    }
}
