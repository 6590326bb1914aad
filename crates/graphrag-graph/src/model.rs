//! Knowledge graph model
//!
//! Entities are stored densely (a [`NodeId`] is the discovery index), and
//! relationships are keyed by their *unordered* endpoint pair. The pair is
//! stored in a canonical orientation (lower normalized key first) so the
//! graph's shape never depends on which chunk happened to be merged first;
//! per-label [`Direction`] keeps the asserted reading for display.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::GraphError;
use crate::normalize_key;

// ============================================================================
// Identifiers
// ============================================================================

/// Dense entity identifier: the entity's position in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Normalized identity key.
    pub key: String,
    /// First-seen surface form.
    pub name: String,
    /// Distinct descriptions, in the order they were first seen.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub descriptions: Vec<String>,
    /// Number of sightings (triple endpoints and entity lines).
    #[serde(default)]
    pub mentions: u32,
}

impl Entity {
    pub(crate) fn new(key: String, name: String) -> Self {
        Self {
            key,
            name,
            descriptions: Vec::new(),
            mentions: 0,
        }
    }

    /// Merge a description; returns `false` when an equivalent one is already present.
    pub(crate) fn add_description(&mut self, text: &str) -> bool {
        let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.is_empty() {
            return false;
        }
        let key = normalize_key(&cleaned);
        if self.descriptions.iter().any(|d| normalize_key(d) == key) {
            return false;
        }
        self.descriptions.push(cleaned);
        true
    }

    /// All descriptions joined for display.
    pub fn description(&self) -> Option<String> {
        if self.descriptions.is_empty() {
            None
        } else {
            Some(self.descriptions.join("; "))
        }
    }
}

// ============================================================================
// Relationships
// ============================================================================

/// Which way a label was asserted relative to the stored (canonical) orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// `source -> label -> target`
    Forward,
    /// `target -> label -> source`
    Reverse,
}

/// One distinct label on an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeLabel {
    pub key: String,
    pub text: String,
    pub direction: Direction,
    pub count: u32,
}

/// An undirected, weighted edge carrying every label it was asserted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: NodeId,
    pub target: NodeId,
    pub labels: Vec<EdgeLabel>,
    /// Number of triples merged into this edge.
    pub weight: u32,
}

impl Relationship {
    pub fn connects(&self, a: NodeId, b: NodeId) -> bool {
        (self.source == a && self.target == b) || (self.source == b && self.target == a)
    }

    /// The endpoint opposite `id`, if `id` is an endpoint.
    pub fn other(&self, id: NodeId) -> Option<NodeId> {
        if self.source == id {
            Some(self.target)
        } else if self.target == id {
            Some(self.source)
        } else {
            None
        }
    }

    /// Comma-joined label texts in discovery order.
    pub fn label_text(&self) -> String {
        self.labels
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Human-readable lines, one per asserted direction:
    /// `A -> solves, extends -> B`.
    pub fn render_lines(&self, graph: &KnowledgeGraph) -> Vec<String> {
        let source = graph.name(self.source);
        let target = graph.name(self.target);
        let mut lines = Vec::with_capacity(2);
        for direction in [Direction::Forward, Direction::Reverse] {
            let labels: Vec<&str> = self
                .labels
                .iter()
                .filter(|l| l.direction == direction)
                .map(|l| l.text.as_str())
                .collect();
            if labels.is_empty() {
                continue;
            }
            let (from, to) = match direction {
                Direction::Forward => (source, target),
                Direction::Reverse => (target, source),
            };
            lines.push(format!("{from} -> {} -> {to}", labels.join(", ")));
        }
        lines
    }

    pub(crate) fn add_label(&mut self, key: String, text: String, direction: Direction) {
        match self
            .labels
            .iter_mut()
            .find(|l| l.key == key && l.direction == direction)
        {
            Some(existing) => existing.count += 1,
            None => self.labels.push(EdgeLabel {
                key,
                text,
                direction,
                count: 1,
            }),
        }
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Entities and relationships extracted from one document.
///
/// Invariants:
/// - entity keys are unique (normalized)
/// - every relationship endpoint is an existing entity
/// - no self-loops; at most one relationship per unordered pair
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    by_key: HashMap<String, NodeId>,
    by_pair: HashMap<(NodeId, NodeId), usize>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.entities.len()
    }

    pub fn edge_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Relationships in discovery order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn entity(&self, id: NodeId) -> Option<&Entity> {
        self.entities.get(id.index())
    }

    /// Display name of `id` (empty for an unknown id).
    pub fn name(&self, id: NodeId) -> &str {
        self.entity(id).map(|e| e.name.as_str()).unwrap_or("")
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.entities.len() as u32).map(NodeId::new)
    }

    /// Look up an entity by any surface form that normalizes to its key.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.by_key.get(&normalize_key(name)).copied()
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.node_id(name).and_then(|id| self.entity(id))
    }

    pub fn relationship_between(&self, a: &str, b: &str) -> Option<&Relationship> {
        let a = self.node_id(a)?;
        let b = self.node_id(b)?;
        self.by_pair
            .get(&pair_key(a, b))
            .map(|&idx| &self.relationships[idx])
    }

    /// Weighted adjacency lists, neighbors in relationship discovery order.
    pub fn adjacency(&self) -> Vec<Vec<(NodeId, u32)>> {
        let mut adj = vec![Vec::new(); self.entities.len()];
        for rel in &self.relationships {
            adj[rel.source.index()].push((rel.target, rel.weight));
            adj[rel.target.index()].push((rel.source, rel.weight));
        }
        adj
    }

    /// Weighted degree of every node, indexed by [`NodeId::index`].
    pub fn degrees(&self) -> Vec<u32> {
        let mut degrees = vec![0u32; self.entities.len()];
        for rel in &self.relationships {
            degrees[rel.source.index()] += rel.weight;
            degrees[rel.target.index()] += rel.weight;
        }
        degrees
    }

    /// Relationships with both endpoints in `members`, paired with their discovery index.
    pub fn relationships_within(&self, members: &[NodeId]) -> Vec<(usize, &Relationship)> {
        let set: BTreeSet<NodeId> = members.iter().copied().collect();
        self.relationships
            .iter()
            .enumerate()
            .filter(|(_, r)| set.contains(&r.source) && set.contains(&r.target))
            .collect()
    }

    /// Order-independent view of the graph: keys, descriptions, pairs, weights, labels.
    ///
    /// Two graphs built from the same triples in any order have equal signatures.
    pub fn signature(&self) -> GraphSignature {
        let nodes = self
            .entities
            .iter()
            .map(|e| {
                let descriptions = e.descriptions.iter().map(|d| normalize_key(d)).collect();
                (e.key.clone(), (e.mentions, descriptions))
            })
            .collect();
        let edges = self
            .relationships
            .iter()
            .map(|r| {
                let labels = r
                    .labels
                    .iter()
                    .map(|l| (l.key.clone(), l.direction, l.count))
                    .collect();
                (
                    (
                        self.entities[r.source.index()].key.clone(),
                        self.entities[r.target.index()].key.clone(),
                    ),
                    (r.weight, labels),
                )
            })
            .collect();
        GraphSignature { nodes, edges }
    }

    // ------------------------------------------------------------------------
    // Mutation (builder only)
    // ------------------------------------------------------------------------

    /// Find or create the entity for `surface`. `None` if the surface is empty after cleaning.
    pub(crate) fn upsert_entity(&mut self, surface: &str) -> Option<(NodeId, bool)> {
        let name = crate::clean_surface(surface);
        if name.is_empty() {
            return None;
        }
        let key = name.to_lowercase();
        if let Some(&id) = self.by_key.get(&key) {
            return Some((id, false));
        }
        let id = NodeId::new(self.entities.len() as u32);
        self.by_key.insert(key.clone(), id);
        self.entities.push(Entity::new(key, name));
        Some((id, true))
    }

    pub(crate) fn entity_mut(&mut self, id: NodeId) -> &mut Entity {
        &mut self.entities[id.index()]
    }

    /// Merge one asserted `from -> label -> to` into the pair's edge.
    /// Returns `true` if a new relationship was created.
    pub(crate) fn upsert_relationship(
        &mut self,
        from: NodeId,
        to: NodeId,
        label_key: String,
        label_text: String,
    ) -> bool {
        let (source, target, direction) =
            if self.entities[from.index()].key <= self.entities[to.index()].key {
                (from, to, Direction::Forward)
            } else {
                (to, from, Direction::Reverse)
            };
        match self.by_pair.get(&pair_key(source, target)) {
            Some(&idx) => {
                let rel = &mut self.relationships[idx];
                rel.weight += 1;
                rel.add_label(label_key, label_text, direction);
                false
            }
            None => {
                self.by_pair
                    .insert(pair_key(source, target), self.relationships.len());
                let mut rel = Relationship {
                    source,
                    target,
                    labels: Vec::new(),
                    weight: 1,
                };
                rel.add_label(label_key, label_text, direction);
                self.relationships.push(rel);
                true
            }
        }
    }

    /// Rebuild a graph from stored parts, re-checking every invariant.
    pub(crate) fn from_parts(
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
    ) -> Result<Self, GraphError> {
        let mut by_key = HashMap::with_capacity(entities.len());
        for (idx, entity) in entities.iter().enumerate() {
            if by_key
                .insert(entity.key.clone(), NodeId::new(idx as u32))
                .is_some()
            {
                return Err(GraphError::DuplicateEntity(entity.key.clone()));
            }
        }
        let mut by_pair = HashMap::with_capacity(relationships.len());
        for (idx, rel) in relationships.iter().enumerate() {
            for end in [rel.source, rel.target] {
                if end.index() >= entities.len() {
                    return Err(GraphError::DanglingEdge(format!("#{}", end.raw())));
                }
            }
            if rel.source == rel.target {
                return Err(GraphError::SelfLoop(entities[rel.source.index()].key.clone()));
            }
            if by_pair.insert(pair_key(rel.source, rel.target), idx).is_some() {
                return Err(GraphError::DuplicateRelationship(
                    entities[rel.source.index()].key.clone(),
                    entities[rel.target.index()].key.clone(),
                ));
            }
        }
        Ok(Self {
            entities,
            relationships,
            by_key,
            by_pair,
        })
    }
}

fn pair_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// See [`KnowledgeGraph::signature`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSignature {
    /// key → (mentions, normalized descriptions)
    pub nodes: BTreeMap<String, (u32, BTreeSet<String>)>,
    /// (source key, target key) → (weight, {(label key, direction, count)})
    pub edges: BTreeMap<(String, String), (u32, BTreeSet<(String, Direction, u32)>)>,
}
