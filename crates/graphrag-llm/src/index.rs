//! Indexing pipeline
//!
//! ```text
//!   chunks ──► extraction tasks (≤ concurrency) ──mpsc──► aggregator
//!                                                        (sole GraphBuilder)
//!                                                            │
//!              community detection ◄─────────────────────────┘
//!                       │
//!                       ▼
//!              summaries (≤ concurrency) ──► IndexOutput
//! ```
//!
//! Extraction calls run concurrently, but only the aggregator task touches
//! the graph. It folds results in chunk order (buffering early arrivals),
//! so the same completions always build the same graph.
//!
//! A failed or empty chunk is logged and counted; only an empty graph, an
//! empty partition or a run where every summary failed abort indexing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use graphrag_graph::{
    graph_json, to_gml, ArtifactBatch, Community, CommunityDetector, CommunitySummarySet,
    GraphBuilder, GraphError, IngestStats, KnowledgeGraph,
};
use graphrag_ingest::{parse_extraction, Chunk, Document, Extraction};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::config::PipelineConfig;
use crate::error::{GenerationError, IndexError};
use crate::generation::{GenerationRequest, TextGenerator};
use crate::prompts::extraction_prompt;
use crate::summarize::CommunitySummarizer;

pub const GRAPH_JSON_FILE: &str = "knowledge_graph.json";
pub const GRAPH_GML_FILE: &str = "knowledge_graph.gml";
pub const SUMMARIES_FILE: &str = "community_summaries.json";

/// Extraction counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub chunks: usize,
    /// Chunks whose non-empty completion parsed to zero triples.
    pub yield_zero: usize,
    /// Chunks whose completion was blank.
    pub empty: usize,
    /// Chunks whose generation call failed.
    pub failed: usize,
    pub lines_skipped: usize,
    pub entity_mentions: usize,
    pub triples: IngestStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub extraction: ExtractionReport,
    pub nodes: usize,
    pub edges: usize,
    pub components: usize,
    pub communities: usize,
    pub modularity: f64,
    pub summaries_failed: Vec<u32>,
}

/// Everything an indexing run produced, before it is written out.
#[derive(Debug, Clone)]
pub struct IndexOutput {
    pub graph: KnowledgeGraph,
    pub communities: Vec<Community>,
    pub summaries: CommunitySummarySet,
    pub report: IndexReport,
}

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub graph_json: PathBuf,
    pub graph_gml: PathBuf,
    pub summaries: PathBuf,
}

impl IndexOutput {
    /// Write all artifacts into `dir` (created if missing).
    pub fn write_artifacts(&self, dir: &Path) -> Result<ArtifactPaths, IndexError> {
        std::fs::create_dir_all(dir).map_err(|source| GraphError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let paths = ArtifactPaths {
            graph_json: dir.join(GRAPH_JSON_FILE),
            graph_gml: dir.join(GRAPH_GML_FILE),
            summaries: dir.join(SUMMARIES_FILE),
        };
        // All three are staged before any is moved into place.
        let mut batch = ArtifactBatch::new();
        batch.stage(&paths.graph_json, &graph_json(&self.graph, &paths.graph_json)?)?;
        batch.stage(&paths.graph_gml, to_gml(&self.graph).as_bytes())?;
        batch.stage(&paths.summaries, &self.summaries.to_json(&paths.summaries)?)?;
        batch.commit()?;
        tracing::info!(dir = %dir.display(), "artifacts written");
        Ok(paths)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

enum ChunkOutcome {
    Parsed(Extraction),
    Failed(GenerationError),
}

struct ChunkResult {
    /// Position in the run's input; the fold order.
    position: usize,
    chunk_id: String,
    outcome: ChunkOutcome,
}

pub struct IndexPipeline {
    generator: Arc<dyn TextGenerator>,
    config: PipelineConfig,
}

impl IndexPipeline {
    pub fn new(generator: Arc<dyn TextGenerator>, config: PipelineConfig) -> Self {
        Self { generator, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Split `document` with the configured splitter and index it.
    pub async fn run_document(&self, document: &Document) -> Result<IndexOutput, IndexError> {
        let chunks = document.chunks(&self.config.chunking)?;
        tracing::info!(
            document = %document.document_id,
            chars = document.text.chars().count(),
            chunks = chunks.len(),
            "document split"
        );
        self.run(chunks).await
    }

    pub async fn run(&self, chunks: Vec<Chunk>) -> Result<IndexOutput, IndexError> {
        let (graph, extraction) = self.build_graph(chunks).await?;

        let detector = CommunityDetector::new(self.config.community.clone());
        let partition = detector.partition_with_report(&graph);
        if partition.communities.is_empty() {
            return Err(IndexError::EmptyPartition);
        }

        let summarizer =
            CommunitySummarizer::new(Arc::clone(&self.generator), self.config.summarization.clone())
                .with_temperature(self.config.generation.temperature);
        let batch = summarizer.summarize_all(&partition.communities, &graph).await?;
        if batch.all_failed() {
            return Err(IndexError::NoSummaries {
                communities: partition.communities.len(),
            });
        }

        let report = IndexReport {
            extraction,
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            components: partition.components,
            communities: partition.communities.len(),
            modularity: partition.modularity,
            summaries_failed: batch.failed,
        };
        Ok(IndexOutput {
            graph,
            communities: partition.communities,
            summaries: batch.summaries,
            report,
        })
    }

    /// Extract every chunk and fold the results into one graph.
    pub async fn build_graph(&self, chunks: Vec<Chunk>) -> Result<(KnowledgeGraph, ExtractionReport), IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::NoChunks);
        }
        let total = chunks.len();
        let concurrency = self.config.extraction.concurrency.max(1);
        tracing::info!(
            chunks = total,
            concurrency,
            generator = %self.generator.describe(),
            "extracting entities and relationships"
        );

        let (tx, rx) = mpsc::channel::<ChunkResult>(concurrency * 2);
        let aggregator = tokio::spawn(aggregate(rx, total));

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        for (position, chunk) in chunks.into_iter().enumerate() {
            let request = GenerationRequest::new(extraction_prompt(&chunk.text))
                .with_max_tokens(self.config.extraction.max_tokens)
                .with_temperature(self.config.generation.temperature);
            let generator = Arc::clone(&self.generator);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = match generator.generate(&request).await {
                    Ok(completion) => ChunkOutcome::Parsed(parse_extraction(&completion)),
                    Err(err) => ChunkOutcome::Failed(err),
                };
                let result = ChunkResult {
                    position,
                    chunk_id: chunk.chunk_id,
                    outcome,
                };
                if tx.send(result).await.is_err() {
                    tracing::warn!("graph aggregator stopped before all chunks were delivered");
                }
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "extraction task aborted");
            }
        }

        let (graph, report) = aggregator
            .await
            .map_err(|e| IndexError::Aborted(e.to_string()))?;

        tracing::info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            yield_zero = report.yield_zero,
            empty = report.empty,
            failed = report.failed,
            triples = report.triples.accepted,
            "graph built"
        );
        if graph.is_empty() {
            return Err(IndexError::EmptyGraph {
                chunks: report.chunks,
                yield_zero: report.yield_zero,
                failed: report.failed,
            });
        }
        Ok((graph, report))
    }
}

/// Single writer: owns the builder and folds results in input order.
async fn aggregate(mut rx: mpsc::Receiver<ChunkResult>, total: usize) -> (KnowledgeGraph, ExtractionReport) {
    let mut builder = GraphBuilder::new();
    let mut report = ExtractionReport {
        chunks: total,
        ..ExtractionReport::default()
    };
    let mut pending: BTreeMap<usize, ChunkResult> = BTreeMap::new();
    let mut next = 0;
    let mut received = 0;

    while let Some(result) = rx.recv().await {
        received += 1;
        pending.insert(result.position, result);
        while let Some(ready) = pending.remove(&next) {
            fold(&mut builder, &mut report, ready);
            next += 1;
        }
    }
    // Gaps left by aborted tasks; fold the rest in order.
    for (_, result) in std::mem::take(&mut pending) {
        fold(&mut builder, &mut report, result);
    }
    report.failed += total.saturating_sub(received);

    (builder.finish(), report)
}

fn fold(builder: &mut GraphBuilder, report: &mut ExtractionReport, result: ChunkResult) {
    match result.outcome {
        ChunkOutcome::Parsed(extraction) => {
            if extraction.is_yield_zero() {
                report.yield_zero += 1;
                tracing::warn!(
                    chunk = %result.chunk_id,
                    lines = extraction.total_lines,
                    "chunk yielded no triples"
                );
            } else if extraction.total_lines == 0 {
                report.empty += 1;
                tracing::warn!(chunk = %result.chunk_id, "extraction returned an empty completion");
            }
            report.lines_skipped += extraction.skipped_lines;
            report.entity_mentions += extraction.entities.len();
            report.triples.merge(builder.ingest(&extraction.triples));
            builder.ingest_entities(&extraction.entities);
        }
        ChunkOutcome::Failed(err) => {
            report.failed += 1;
            tracing::warn!(chunk = %result.chunk_id, error = %err, "extraction call failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{FnGenerator, ScriptedGenerator};

    fn chunks(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::new("doc", i, *t, 0, t.len()))
            .collect()
    }

    #[tokio::test]
    async fn no_chunks_is_fatal() {
        let pipeline = IndexPipeline::new(
            Arc::new(ScriptedGenerator::default()),
            PipelineConfig::default(),
        );
        assert!(matches!(pipeline.run(Vec::new()).await, Err(IndexError::NoChunks)));
    }

    #[tokio::test]
    async fn all_yield_zero_is_an_empty_graph() {
        let generator = Arc::new(FnGenerator::new(|_req: &GenerationRequest| {
            Ok("I could not find any entities.".to_string())
        }));
        let pipeline = IndexPipeline::new(generator, PipelineConfig::default());
        let err = pipeline.run(chunks(&["a", "b"])).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::EmptyGraph { chunks: 2, yield_zero: 2, failed: 0 }
        ));
    }

    #[tokio::test]
    async fn failed_chunks_are_skipped_not_fatal() {
        let generator = Arc::new(FnGenerator::new(|req: &GenerationRequest| {
            if req.prompt.contains("second") {
                Err(GenerationError::Permanent("filtered".into()))
            } else {
                Ok("- GraphRAG -> extends -> RAG".to_string())
            }
        }));
        let pipeline = IndexPipeline::new(generator, PipelineConfig::default());
        let (graph, report) = pipeline
            .build_graph(chunks(&["first", "second", "third"]))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.yield_zero, 0);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.relationships()[0].weight, 2);
    }

    #[tokio::test]
    async fn results_fold_in_chunk_order() {
        let generator = Arc::new(FnGenerator::new(|req: &GenerationRequest| {
            let text = req.prompt.rsplit("Text:\n").next().unwrap_or_default().trim();
            Ok(format!("- {text} -> precedes -> next of {text}"))
        }));
        let config = PipelineConfig {
            extraction: crate::config::ExtractionConfig {
                concurrency: 8,
                max_tokens: None,
            },
            ..PipelineConfig::default()
        };
        let pipeline = IndexPipeline::new(generator, config);
        let texts: Vec<String> = (0..20).map(|i| format!("chunk{i:02}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let (graph, _) = pipeline.build_graph(chunks(&refs)).await.unwrap();
        let names: Vec<&str> = graph.entities().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names[0], "chunk00");
        assert_eq!(names[2], "chunk01");
        assert_eq!(names[38], "chunk19");
    }

    #[tokio::test]
    async fn chunks_sharing_an_index_are_all_folded() {
        // Two documents whose chunk numbering both start at zero.
        let generator = Arc::new(FnGenerator::new(|req: &GenerationRequest| {
            let text = req.prompt.rsplit("Text:\n").next().unwrap_or_default().trim();
            Ok(format!("- {text} -> mentions -> topic"))
        }));
        let pipeline = IndexPipeline::new(generator, PipelineConfig::default());
        let input = vec![
            Chunk::new("docA", 1, "A1", 0, 2),
            Chunk::new("docB", 1, "B1", 0, 2),
            Chunk::new("docA", 0, "A0", 0, 2),
        ];
        let (graph, report) = pipeline.build_graph(input).await.unwrap();

        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.triples.accepted, 3);
        let names: Vec<&str> = graph.entities().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A1", "topic", "B1", "A0"]);
    }

    #[tokio::test]
    async fn blank_completions_are_not_yield_zero() {
        let generator = Arc::new(FnGenerator::new(|req: &GenerationRequest| {
            if req.prompt.contains("blank") {
                Ok("  \n\n".to_string())
            } else if req.prompt.contains("prose") {
                Ok("Nothing to extract here.".to_string())
            } else {
                Ok("- A -> knows -> B".to_string())
            }
        }));
        let pipeline = IndexPipeline::new(generator, PipelineConfig::default());
        let (_, report) = pipeline
            .build_graph(chunks(&["blank", "prose", "facts"]))
            .await
            .unwrap();
        assert_eq!(report.yield_zero, 1);
        assert_eq!(report.empty, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn a_failed_write_leaves_no_artifacts() {
        let generator = Arc::new(FnGenerator::new(|req: &GenerationRequest| {
            if req.prompt.starts_with("Extract") {
                Ok("- A -> knows -> B".to_string())
            } else {
                Ok("A knows B.".to_string())
            }
        }));
        let pipeline = IndexPipeline::new(generator, PipelineConfig::default());
        let output = pipeline.run(chunks(&["text"])).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        // The summaries file cannot be staged: its temp path is a directory.
        std::fs::create_dir_all(dir.path().join(format!(".{SUMMARIES_FILE}.tmp"))).unwrap();

        assert!(output.write_artifacts(dir.path()).is_err());
        assert!(!dir.path().join(GRAPH_JSON_FILE).exists());
        assert!(!dir.path().join(GRAPH_GML_FILE).exists());
        assert!(!dir.path().join(SUMMARIES_FILE).exists());
        assert!(!dir.path().join(format!(".{GRAPH_JSON_FILE}.tmp")).exists());
        assert!(!dir.path().join(format!(".{GRAPH_GML_FILE}.tmp")).exists());
    }

    #[tokio::test]
    async fn extraction_and_summary_calls_share_the_temperature() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record_temperature = Arc::clone(&seen);
        let generator = Arc::new(FnGenerator::new(move |req: &GenerationRequest| {
            record_temperature.lock().unwrap().push(req.temperature);
            if req.prompt.starts_with("Extract") {
                Ok("- A -> knows -> B".to_string())
            } else {
                Ok("A knows B.".to_string())
            }
        }));
        let mut config = PipelineConfig::default();
        config.generation.temperature = Some(0.5);
        IndexPipeline::new(generator, config)
            .run(chunks(&["one", "two"]))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(0.5); 3]);
    }

    #[tokio::test]
    async fn all_summaries_failing_is_fatal() {
        let generator = Arc::new(FnGenerator::new(|req: &GenerationRequest| {
            if req.prompt.starts_with("Extract") {
                Ok("- A -> knows -> B".to_string())
            } else {
                Err(GenerationError::Permanent("nope".into()))
            }
        }));
        let pipeline = IndexPipeline::new(generator, PipelineConfig::default());
        let err = pipeline.run(chunks(&["text"])).await.unwrap_err();
        assert!(matches!(err, IndexError::NoSummaries { communities: 1 }));
    }

    #[tokio::test]
    async fn artifacts_are_written() {
        let generator = Arc::new(FnGenerator::new(|req: &GenerationRequest| {
            if req.prompt.starts_with("Extract") {
                Ok("- A -> knows -> B".to_string())
            } else {
                Ok("A knows B.".to_string())
            }
        }));
        let pipeline = IndexPipeline::new(generator, PipelineConfig::default());
        let output = pipeline.run(chunks(&["text"])).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let paths = output.write_artifacts(&dir.path().join("out")).unwrap();

        let summaries = CommunitySummarySet::load(&paths.summaries).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries.get(0).unwrap().summary, "A knows B.");
        let graph = graphrag_graph::load_graph(&paths.graph_json).unwrap();
        assert_eq!(graph.signature(), output.graph.signature());
        assert!(std::fs::read_to_string(&paths.graph_gml).unwrap().starts_with("graph ["));
    }
}
