//! Durable artifacts
//!
//! Two files come out of an indexing run:
//!
//! - `knowledge_graph.json`: the full graph (plus an optional GML export for
//!   graph tooling). Written once, never read by the query path.
//! - `community_summaries.json`: `[{community_id, nodes, summary}, ...]`, the
//!   only file the query path reads.
//!
//! Writes go to a sibling temp file and are renamed into place, so a failed
//! run never leaves a half-written artifact behind. [`ArtifactBatch`] stages
//! several files first and renames them only once every one is on disk.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::GraphError;
use crate::model::{EdgeLabel, Entity, KnowledgeGraph, Relationship};

pub const GRAPH_ARTIFACT_VERSION: u32 = 1;

// ============================================================================
// Graph artifact
// ============================================================================

/// On-disk form of a [`KnowledgeGraph`]; relationships refer to entity keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphArtifactV1 {
    pub version: u32,
    pub entities: Vec<Entity>,
    pub relationships: Vec<RelationshipRecordV1>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRecordV1 {
    pub source: String,
    pub target: String,
    pub weight: u32,
    pub labels: Vec<EdgeLabel>,
}

impl GraphArtifactV1 {
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        let key = |id: crate::NodeId| graph.entities()[id.index()].key.clone();
        Self {
            version: GRAPH_ARTIFACT_VERSION,
            entities: graph.entities().to_vec(),
            relationships: graph
                .relationships()
                .iter()
                .map(|r| RelationshipRecordV1 {
                    source: key(r.source),
                    target: key(r.target),
                    weight: r.weight,
                    labels: r.labels.clone(),
                })
                .collect(),
        }
    }

    pub fn into_graph(self) -> Result<KnowledgeGraph, GraphError> {
        if self.version != GRAPH_ARTIFACT_VERSION {
            return Err(GraphError::UnsupportedVersion {
                found: self.version,
                expected: GRAPH_ARTIFACT_VERSION,
            });
        }
        let index: std::collections::HashMap<&str, crate::NodeId> = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key.as_str(), crate::NodeId::new(i as u32)))
            .collect();
        let mut relationships = Vec::with_capacity(self.relationships.len());
        for record in &self.relationships {
            let source = *index
                .get(record.source.as_str())
                .ok_or_else(|| GraphError::DanglingEdge(record.source.clone()))?;
            let target = *index
                .get(record.target.as_str())
                .ok_or_else(|| GraphError::DanglingEdge(record.target.clone()))?;
            relationships.push(Relationship {
                source,
                target,
                labels: record.labels.clone(),
                weight: record.weight,
            });
        }
        drop(index);
        KnowledgeGraph::from_parts(self.entities, relationships)
    }
}

/// Serialized `knowledge_graph.json`; `path` only labels errors.
pub fn graph_json(graph: &KnowledgeGraph, path: &Path) -> Result<Vec<u8>, GraphError> {
    serde_json::to_vec_pretty(&GraphArtifactV1::from_graph(graph)).map_err(|e| GraphError::json(path, e))
}

pub fn save_graph(graph: &KnowledgeGraph, path: &Path) -> Result<(), GraphError> {
    write_atomic(path, &graph_json(graph, path)?)
}

pub fn load_graph(path: &Path) -> Result<KnowledgeGraph, GraphError> {
    let bytes = fs::read(path).map_err(|e| GraphError::io(path, e))?;
    let artifact: GraphArtifactV1 =
        serde_json::from_slice(&bytes).map_err(|e| GraphError::json(path, e))?;
    artifact.into_graph()
}

/// Export in GML (readable by networkx, igraph, Gephi).
pub fn to_gml(graph: &KnowledgeGraph) -> String {
    let mut out = String::from("graph [\n  directed 0\n");
    for (idx, entity) in graph.entities().iter().enumerate() {
        let _ = writeln!(out, "  node [\n    id {idx}\n    label \"{}\"", gml_escape(&entity.name));
        if let Some(desc) = entity.description() {
            let _ = writeln!(out, "    description \"{}\"", gml_escape(&desc));
        }
        let _ = writeln!(out, "  ]");
    }
    for rel in graph.relationships() {
        let _ = writeln!(
            out,
            "  edge [\n    source {}\n    target {}\n    label \"{}\"\n    weight {}\n  ]",
            rel.source.raw(),
            rel.target.raw(),
            gml_escape(&rel.label_text()),
            rel.weight
        );
    }
    out.push_str("]\n");
    out
}

/// GML strings cannot contain raw quotes or `&`; use HTML entities like networkx does.
fn gml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

// ============================================================================
// Community summary artifact
// ============================================================================

/// One summarized community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunitySummaryRecord {
    pub community_id: u32,
    /// Member display names.
    pub nodes: Vec<String>,
    pub summary: String,
    /// The summary call failed and `summary` holds a placeholder.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
}

impl CommunitySummaryRecord {
    pub fn new(community_id: u32, nodes: Vec<String>, summary: impl Into<String>) -> Self {
        Self {
            community_id,
            nodes,
            summary: summary.into(),
            failed: false,
        }
    }

    pub fn unavailable(community_id: u32, nodes: Vec<String>, placeholder: impl Into<String>) -> Self {
        Self {
            failed: true,
            ..Self::new(community_id, nodes, placeholder)
        }
    }

    /// Whether the record carries a usable summary.
    pub fn is_usable(&self) -> bool {
        !self.failed && !self.summary.trim().is_empty()
    }
}

/// Ordered (by community id) summary records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommunitySummarySet {
    records: Vec<CommunitySummaryRecord>,
}

impl CommunitySummarySet {
    /// Sorts by id; rejects duplicate ids.
    pub fn new(mut records: Vec<CommunitySummaryRecord>) -> Result<Self, GraphError> {
        records.sort_by_key(|r| r.community_id);
        let mut seen = BTreeSet::new();
        for record in &records {
            if !seen.insert(record.community_id) {
                return Err(GraphError::DuplicateCommunity(record.community_id));
            }
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CommunitySummaryRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommunitySummaryRecord> {
        self.records.iter()
    }

    pub fn get(&self, community_id: u32) -> Option<&CommunitySummaryRecord> {
        self.records
            .binary_search_by_key(&community_id, |r| r.community_id)
            .ok()
            .map(|i| &self.records[i])
    }

    /// Serialized `community_summaries.json`; `path` only labels errors.
    pub fn to_json(&self, path: &Path) -> Result<Vec<u8>, GraphError> {
        serde_json::to_vec_pretty(&self.records).map_err(|e| GraphError::json(path, e))
    }

    pub fn save(&self, path: &Path) -> Result<(), GraphError> {
        write_atomic(path, &self.to_json(path)?)
    }

    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let bytes = fs::read(path).map_err(|e| GraphError::io(path, e))?;
        let records: Vec<CommunitySummaryRecord> =
            serde_json::from_slice(&bytes).map_err(|e| GraphError::json(path, e))?;
        Self::new(records)
    }
}

// ============================================================================
// Atomic writes
// ============================================================================

/// Write `bytes` to `path` via a temp file in the same directory + rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), GraphError> {
    let mut batch = ArtifactBatch::new();
    batch.stage(path, bytes)?;
    batch.commit()
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}

/// Files written together or not at all.
///
/// [`stage`](Self::stage) writes each file to its temp path;
/// [`commit`](Self::commit) renames them into place. Dropping an uncommitted
/// batch removes its temp files. If a rename fails, the files already moved
/// by this batch are removed again.
#[derive(Debug, Default)]
pub struct ArtifactBatch {
    /// `(temp, final)` pairs in staging order.
    staged: Vec<(PathBuf, PathBuf)>,
}

impl ArtifactBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, path: &Path, bytes: &[u8]) -> Result<(), GraphError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| GraphError::io(parent, e))?;
        }
        let tmp = temp_path(path);
        if let Err(e) = fs::write(&tmp, bytes) {
            if tmp.is_file() {
                let _ = fs::remove_file(&tmp);
            }
            return Err(GraphError::io(&tmp, e));
        }
        self.staged.push((tmp, path.to_path_buf()));
        Ok(())
    }

    pub fn commit(mut self) -> Result<(), GraphError> {
        let staged = std::mem::take(&mut self.staged);
        let mut moved: Vec<PathBuf> = Vec::with_capacity(staged.len());
        let mut pending = staged.into_iter();
        while let Some((tmp, path)) = pending.next() {
            if let Err(e) = fs::rename(&tmp, &path) {
                let _ = fs::remove_file(&tmp);
                for (rest, _) in pending {
                    let _ = fs::remove_file(rest);
                }
                for done in &moved {
                    let _ = fs::remove_file(done);
                }
                return Err(GraphError::io(&path, e));
            }
            moved.push(path);
        }
        Ok(())
    }
}

impl Drop for ArtifactBatch {
    fn drop(&mut self) {
        for (tmp, _) in self.staged.drain(..) {
            let _ = fs::remove_file(tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{GraphBuilder, Triple};

    #[test]
    fn gml_escapes_quotes() {
        let mut b = GraphBuilder::new();
        b.ingest(&[Triple::new("Say \"hi\"", "greets", "World")]);
        let gml = to_gml(&b.finish());
        assert!(gml.contains("label \"Say &quot;hi"));
        assert!(gml.contains("directed 0"));
        assert!(gml.contains("weight 1"));
    }

    #[test]
    fn summary_set_sorts_and_rejects_duplicates() {
        let rec = |id: u32| CommunitySummaryRecord::new(id, vec![format!("n{id}")], format!("s{id}"));
        let set = CommunitySummarySet::new(vec![rec(2), rec(0), rec(1)]).unwrap();
        let ids: Vec<u32> = set.iter().map(|r| r.community_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(set.get(1).unwrap().summary, "s1");
        assert!(set.get(9).is_none());
        assert!(matches!(
            CommunitySummarySet::new(vec![rec(0), rec(0)]),
            Err(GraphError::DuplicateCommunity(0))
        ));
    }

    #[test]
    fn failure_flag_is_only_written_when_set() {
        let ok = CommunitySummaryRecord::new(0, vec!["a".into()], "about a");
        let failed = CommunitySummaryRecord::unavailable(1, vec!["b".into()], "(summary unavailable)");
        let v = serde_json::to_value([&ok, &failed]).unwrap();
        assert!(v[0].get("failed").is_none());
        assert_eq!(v[1]["failed"], true);
        assert!(ok.is_usable());
        assert!(!failed.is_usable());

        let loaded: CommunitySummaryRecord =
            serde_json::from_str(r#"{"community_id":2,"nodes":[],"summary":"x"}"#).unwrap();
        assert!(!loaded.failed);
    }

    #[test]
    fn a_batch_that_fails_to_stage_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        fs::create_dir_all(temp_path(&second)).unwrap();

        let mut batch = ArtifactBatch::new();
        batch.stage(&first, b"{}").unwrap();
        assert!(temp_path(&first).exists());
        assert!(batch.stage(&second, b"{}").is_err());
        drop(batch);

        assert!(!first.exists());
        assert!(!temp_path(&first).exists());
        assert!(!second.exists());
    }

    #[test]
    fn a_committed_batch_moves_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("nested/a.json");
        let b = dir.path().join("b.gml");
        let mut batch = ArtifactBatch::new();
        batch.stage(&a, b"[1]").unwrap();
        batch.stage(&b, b"graph [\n]\n").unwrap();
        batch.commit().unwrap();
        assert_eq!(fs::read_to_string(&a).unwrap(), "[1]");
        assert!(fs::read_to_string(&b).unwrap().starts_with("graph ["));
        assert!(!temp_path(&a).exists() && !temp_path(&b).exists());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let artifact = GraphArtifactV1 {
            version: 99,
            entities: vec![],
            relationships: vec![],
        };
        assert!(matches!(
            artifact.into_graph(),
            Err(GraphError::UnsupportedVersion { found: 99, .. })
        ));
    }
}
