//! Community detection
//!
//! Partitions a [`KnowledgeGraph`] into topical communities:
//!
//! - every connected component is handled on its own, so disconnected
//!   components never share a community;
//! - components below `min_split_size` nodes are kept whole;
//! - larger components go through Leiden-style optimization (see [`leiden`]).
//!
//! The partition is total and disjoint. With a fixed seed and a fixed graph
//! the result is reproducible.

mod leiden;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::model::{KnowledgeGraph, NodeId};
use leiden::{LeidenParams, WeightedGraph};

/// A non-empty set of entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: u32,
    /// Members in discovery order.
    pub members: Vec<NodeId>,
}

impl Community {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    /// Display names of the members.
    pub fn member_names(&self, graph: &KnowledgeGraph) -> Vec<String> {
        self.members
            .iter()
            .map(|&id| graph.name(id).to_string())
            .collect()
    }
}

/// Detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityConfig {
    /// Modularity resolution γ. Lower → fewer, larger communities.
    pub resolution: f64,
    /// Seed for node visitation order.
    pub seed: u64,
    /// Minimum modularity gain for a move to count as an improvement.
    pub epsilon: f64,
    /// Components with fewer nodes than this stay one community.
    pub min_split_size: usize,
    /// Upper bound on aggregation levels.
    pub max_levels: usize,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            seed: 42,
            epsilon: 1e-7,
            min_split_size: 5,
            max_levels: 32,
        }
    }
}

/// Partition plus the numbers worth logging.
#[derive(Debug, Clone)]
pub struct PartitionReport {
    pub communities: Vec<Community>,
    /// Modularity of the final partition over the whole graph.
    pub modularity: f64,
    pub components: usize,
    /// Deepest aggregation reached in any component.
    pub levels: usize,
}

/// Modularity-optimizing community detector.
#[derive(Debug, Clone, Default)]
pub struct CommunityDetector {
    config: CommunityConfig,
}

impl CommunityDetector {
    pub fn new(config: CommunityConfig) -> Self {
        Self { config }
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.config.resolution = resolution;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn with_min_split_size(mut self, min_split_size: usize) -> Self {
        self.config.min_split_size = min_split_size;
        self
    }

    pub fn config(&self) -> &CommunityConfig {
        &self.config
    }

    /// Partition all nodes of `graph`. An empty graph yields an empty list.
    pub fn partition(&self, graph: &KnowledgeGraph) -> Vec<Community> {
        self.partition_with_report(graph).communities
    }

    pub fn partition_with_report(&self, graph: &KnowledgeGraph) -> PartitionReport {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let adjacency = graph.adjacency();
        let components = connected_components(&adjacency);
        let params = LeidenParams {
            resolution: self.config.resolution,
            epsilon: self.config.epsilon,
            max_levels: self.config.max_levels,
        };

        let mut groups: Vec<Vec<NodeId>> = Vec::new();
        let mut levels = 0;
        // Global id -> position within the current component; edges never
        // leave a component, so entries from earlier components are never read.
        let mut local = vec![usize::MAX; graph.node_count()];
        for component in &components {
            if component.len() < self.config.min_split_size.max(2) {
                groups.push(component.clone());
                continue;
            }

            for (i, id) in component.iter().enumerate() {
                local[id.index()] = i;
            }
            let local = &local;
            let adjacency = &adjacency;
            let edges = component
                .iter()
                .enumerate()
                .flat_map(move |(i, id)| {
                    adjacency[id.index()]
                        .iter()
                        .map(move |(nbr, w)| (i, local[nbr.index()], f64::from(*w)))
                })
                .filter(|(a, b, _)| a < b);
            let weighted = WeightedGraph::from_edges(component.len(), edges);
            let outcome = leiden::optimize(&weighted, params, &mut rng);
            levels = levels.max(outcome.levels);

            let mut split = vec![Vec::new(); outcome.count];
            for (i, &c) in outcome.membership.iter().enumerate() {
                split[c].push(component[i]);
            }
            groups.extend(split.into_iter().filter(|g| !g.is_empty()));
        }

        for group in &mut groups {
            group.sort();
        }
        groups.sort_by_key(|g| g[0]);
        let communities: Vec<Community> = groups
            .into_iter()
            .enumerate()
            .map(|(id, members)| Community {
                id: id as u32,
                members,
            })
            .collect();

        let modularity = partition_modularity(graph, &communities, self.config.resolution);
        tracing::info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            components = components.len(),
            communities = communities.len(),
            modularity,
            levels,
            "community detection finished"
        );

        PartitionReport {
            communities,
            modularity,
            components: components.len(),
            levels,
        }
    }
}

/// Modularity of a full partition of `graph`.
pub fn partition_modularity(graph: &KnowledgeGraph, communities: &[Community], resolution: f64) -> f64 {
    let mut membership = vec![0usize; graph.node_count()];
    for community in communities {
        for id in &community.members {
            membership[id.index()] = community.id as usize;
        }
    }
    let edges = graph
        .relationships()
        .iter()
        .map(|r| (r.source.index(), r.target.index(), f64::from(r.weight)));
    let weighted = WeightedGraph::from_edges(graph.node_count(), edges);
    leiden::modularity(&weighted, &membership, resolution)
}

/// Connected components in discovery order (BFS from the lowest unvisited id).
fn connected_components(adjacency: &[Vec<(NodeId, u32)>]) -> Vec<Vec<NodeId>> {
    let mut visited = vec![false; adjacency.len()];
    let mut components = Vec::new();
    for start in 0..adjacency.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut component = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(v) = queue.pop_front() {
            component.push(NodeId::new(v as u32));
            for (nbr, _) in &adjacency[v] {
                if !visited[nbr.index()] {
                    visited[nbr.index()] = true;
                    queue.push_back(nbr.index());
                }
            }
        }
        component.sort();
        components.push(component);
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{EntityMention, GraphBuilder, Triple};

    fn graph(triples: &[(&str, &str, &str)]) -> KnowledgeGraph {
        let mut b = GraphBuilder::new();
        let batch: Vec<Triple> = triples.iter().map(|(a, l, c)| Triple::new(*a, *l, *c)).collect();
        b.ingest(&batch);
        b.finish()
    }

    fn clique_pair() -> KnowledgeGraph {
        let mut triples = Vec::new();
        for side in ["a", "b"] {
            for i in 0..4 {
                for j in (i + 1)..4 {
                    triples.push((format!("{side}{i}"), "linked".to_string(), format!("{side}{j}")));
                }
            }
        }
        triples.push(("a3".into(), "bridge".into(), "b0".into()));
        let mut b = GraphBuilder::new();
        let batch: Vec<Triple> = triples.iter().map(|(a, l, c)| Triple::new(a, l, c)).collect();
        b.ingest(&batch);
        b.finish()
    }

    #[test]
    fn empty_graph_yields_no_communities() {
        let report = CommunityDetector::default().partition_with_report(&KnowledgeGraph::new());
        assert!(report.communities.is_empty());
        assert_eq!(report.components, 0);
    }

    #[test]
    fn single_isolated_node_is_one_singleton() {
        let mut b = GraphBuilder::new();
        b.ingest_entities(&[EntityMention {
            name: "Loner".into(),
            description: None,
        }]);
        let g = b.finish();
        let communities = CommunityDetector::default().partition(&g);
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].member_names(&g), vec!["Loner"]);
    }

    #[test]
    fn small_component_is_not_split() {
        let g = graph(&[
            ("RAG", "fails_at", "global_questions"),
            ("GraphRAG", "extends", "RAG"),
            ("GraphRAG", "uses", "community_detection"),
        ]);
        let communities = CommunityDetector::default().partition(&g);
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].len(), 4);
    }

    #[test]
    fn disconnected_components_never_merge() {
        let g = graph(&[("A", "r", "B"), ("C", "r", "D")]);
        let communities = CommunityDetector::default()
            .with_resolution(0.01)
            .with_min_split_size(1)
            .partition(&g);
        assert_eq!(communities.len(), 2);
        for c in &communities {
            assert_eq!(c.len(), 2);
        }
    }

    #[test]
    fn two_cliques_split_along_the_bridge() {
        let g = clique_pair();
        let report = CommunityDetector::default().partition_with_report(&g);
        assert_eq!(report.communities.len(), 2);
        assert!(report.modularity > 0.3);
        let first: Vec<String> = report.communities[0].member_names(&g);
        assert!(first.iter().all(|n| n.starts_with('a')));
    }

    #[test]
    fn several_splittable_components_are_each_partitioned() {
        let mut triples = Vec::new();
        for group in ["p", "q", "r"] {
            for side in ["x", "y"] {
                for i in 0..4 {
                    for j in (i + 1)..4 {
                        triples.push(Triple::new(format!("{group}{side}{i}"), "linked", format!("{group}{side}{j}")));
                    }
                }
            }
            triples.push(Triple::new(format!("{group}x3"), "bridge", format!("{group}y0")));
        }
        let mut b = GraphBuilder::new();
        b.ingest(&triples);
        let g = b.finish();

        let report = CommunityDetector::default().partition_with_report(&g);
        assert_eq!(report.components, 3);
        assert_eq!(report.communities.len(), 6);
        for community in &report.communities {
            let names = community.member_names(&g);
            assert_eq!(names.len(), 4);
            let prefix = &names[0][..2];
            assert!(names.iter().all(|n| n.starts_with(prefix)), "{names:?}");
        }
    }

    #[test]
    fn ids_follow_earliest_member() {
        let g = clique_pair();
        let communities = CommunityDetector::default().partition(&g);
        for (i, c) in communities.iter().enumerate() {
            assert_eq!(c.id as usize, i);
        }
        assert!(communities[0].members[0] < communities[1].members[0]);
    }

    #[test]
    fn same_seed_reproduces_partition() {
        let g = clique_pair();
        let a = CommunityDetector::default().with_seed(11).partition(&g);
        let b = CommunityDetector::default().with_seed(11).partition(&g);
        assert_eq!(a, b);
    }
}
