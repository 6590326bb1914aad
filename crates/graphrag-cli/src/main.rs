//! GraphRAG CLI
//!
//! - `graphrag index`: document → knowledge graph → communities → summaries
//! - `graphrag query`: map/reduce a global question over stored summaries
//! - `graphrag inspect`: quick look at a stored graph artifact
//!
//! Logs and status lines go to stderr; stdout carries only command output
//! (the answer, or the inspect report).

use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use graphrag_graph::{load_graph, CommunitySummarySet, KnowledgeGraph};
use graphrag_ingest::load_document;
use graphrag_llm::{
    build_generator, Backend, IndexPipeline, PipelineConfig, QueryError, QuerySynthesizer,
    SUMMARIES_FILE,
};

mod fetch;

const DEFAULT_OUTPUT_DIR: &str = "output";

#[derive(Parser)]
#[command(name = "graphrag")]
#[command(
    author,
    version,
    about = "GraphRAG: knowledge-graph indexing and global question answering over a document"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a document: extract a knowledge graph, detect communities and summarize them.
    ///
    /// Writes `knowledge_graph.json`, `knowledge_graph.gml` and
    /// `community_summaries.json` into `--output-dir`. Nothing is written
    /// when the run fails.
    Index(IndexArgs),

    /// Answer a question over the community summaries of an indexed document.
    ///
    /// Exit code 2 when no community produced an answer.
    Query(QueryArgs),

    /// Print counts and the most connected entities of a graph artifact.
    Inspect(InspectArgs),
}

/// Generation backend overrides (applied after the config file and env).
#[derive(Args, Debug, Clone, Default)]
struct LlmArgs {
    /// Backend: ollama|openai|anthropic.
    #[arg(long)]
    backend: Option<Backend>,
    /// Model name (e.g. `qwen2:1.5b`, `gpt-4o-mini`).
    #[arg(long)]
    model: Option<String>,
    /// Ollama host (default: `http://127.0.0.1:11434`).
    #[arg(long)]
    ollama_host: Option<String>,
    /// Base URL for the OpenAI / Anthropic backends.
    #[arg(long)]
    base_url: Option<String>,
    /// Per-call timeout in seconds (0 disables).
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Attempts per call, including the first.
    #[arg(long)]
    max_attempts: Option<u32>,
    /// Concurrent generation calls per stage.
    #[arg(long)]
    concurrency: Option<usize>,
}

impl LlmArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        let g = &mut config.generation;
        if let Some(backend) = self.backend {
            g.backend = backend;
        }
        if let Some(model) = &self.model {
            g.model = model.clone();
        }
        if let Some(host) = &self.ollama_host {
            g.ollama_host = Some(host.clone());
        }
        if let Some(url) = &self.base_url {
            g.base_url = Some(url.clone());
        }
        if let Some(secs) = self.timeout_secs {
            g.timeout_secs = secs;
        }
        if let Some(n) = self.max_attempts {
            g.max_attempts = n;
        }
        if let Some(n) = self.concurrency {
            config.extraction.concurrency = n;
            config.summarization.concurrency = n;
            config.query.concurrency = n;
        }
    }
}

#[derive(Args)]
#[command(group(ArgGroup::new("source").required(true).args(["input", "url"])))]
struct IndexArgs {
    /// Input document (.txt, .md, .pdf).
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Download the document from a URL instead.
    #[arg(long)]
    url: Option<String>,
    /// Directory for the artifacts.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,
    /// JSON pipeline config (any subset of sections).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Chunk window in characters.
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Characters shared by consecutive chunks.
    #[arg(long)]
    chunk_overlap: Option<usize>,
    /// Community resolution (lower → fewer, larger communities).
    #[arg(long)]
    resolution: Option<f64>,
    /// Seed for community detection.
    #[arg(long)]
    seed: Option<u64>,
    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct QueryArgs {
    /// The question.
    #[arg(short, long)]
    query: String,
    /// Community summaries written by `graphrag index`.
    #[arg(long)]
    summaries: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the answer (and per-community outcomes) as JSON.
    #[arg(long)]
    json: bool,
    /// Also print every community's partial answer to stderr.
    #[arg(long)]
    show_intermediate: bool,
    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct InspectArgs {
    /// Graph artifact (`knowledge_graph.json`).
    #[arg(long, default_value = "output/knowledge_graph.json")]
    graph: PathBuf,
    /// How many entities to list.
    #[arg(long, default_value_t = 10)]
    top: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Index(args) => cmd_index(args).await,
        Commands::Query(args) => cmd_query(args).await,
        Commands::Inspect(args) => cmd_inspect(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(exit_status(&err))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<QueryError>() {
        Some(QueryError::NoAnswerDerivable { .. }) => 2,
        _ => 1,
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = PipelineConfig::load(path).with_context(|| match path {
        Some(path) => format!("failed to load config {}", path.display()),
        None => "failed to load config from environment".to_string(),
    })?;
    Ok(config)
}

// ============================================================================
// index
// ============================================================================

async fn cmd_index(args: IndexArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    args.llm.apply(&mut config);
    if let Some(n) = args.chunk_size {
        config.chunking.chunk_size = n;
    }
    if let Some(n) = args.chunk_overlap {
        config.chunking.chunk_overlap = n;
    }
    if let Some(r) = args.resolution {
        config.community.resolution = r;
    }
    if let Some(s) = args.seed {
        config.community.seed = s;
    }
    config.validate()?;

    let document = match (&args.input, &args.url) {
        (Some(path), _) => {
            eprintln!("{} {}", "Indexing".green().bold(), path.display());
            load_document(path).with_context(|| format!("failed to load {}", path.display()))?
        }
        (None, Some(url)) => {
            eprintln!("{} {}", "Downloading".green().bold(), url);
            fetch::fetch_document(url).await?
        }
        (None, None) => anyhow::bail!("either --input or --url is required"),
    };

    let generator = build_generator(&config.generation)?;
    let pipeline = IndexPipeline::new(generator, config);
    let output = pipeline
        .run_document(&document)
        .await
        .with_context(|| format!("indexing {} failed", document.document_id))?;
    let paths = output
        .write_artifacts(&args.output_dir)
        .context("failed to write artifacts")?;

    let report = &output.report;
    eprintln!(
        "  {} {} chunks ({} yielded nothing, {} blank, {} failed)",
        "→".yellow(),
        report.extraction.chunks,
        report.extraction.yield_zero,
        report.extraction.empty,
        report.extraction.failed
    );
    eprintln!(
        "  {} {} entities, {} relationships, {} communities (modularity {:.3})",
        "→".yellow(),
        report.nodes,
        report.edges,
        report.communities,
        report.modularity
    );
    if !report.summaries_failed.is_empty() {
        eprintln!(
            "  {} {} community summaries failed: {:?}",
            "!".red().bold(),
            report.summaries_failed.len(),
            report.summaries_failed
        );
    }
    for path in [&paths.graph_json, &paths.graph_gml, &paths.summaries] {
        eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
    }
    Ok(())
}

// ============================================================================
// query
// ============================================================================

async fn cmd_query(args: QueryArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    args.llm.apply(&mut config);
    config.validate()?;

    let summaries_path = args
        .summaries
        .clone()
        .unwrap_or_else(|| Path::new(DEFAULT_OUTPUT_DIR).join(SUMMARIES_FILE));
    let summaries = CommunitySummarySet::load(&summaries_path)
        .with_context(|| format!("failed to load summaries {}", summaries_path.display()))?;
    eprintln!(
        "{} {} over {} communities",
        "Querying".green().bold(),
        summaries_path.display(),
        summaries.len()
    );

    let generator = build_generator(&config.generation)?;
    let synthesizer = QuerySynthesizer::new(generator, config.query.clone())
        .with_temperature(config.generation.temperature);
    let answer = synthesizer.answer(&args.query, &summaries).await?;

    if args.show_intermediate {
        for partial in &answer.intermediate {
            match partial.text() {
                Some(text) => eprintln!("{} {}", format!("[{}]", partial.community_id).cyan(), text.trim()),
                None => eprintln!("{} {}", format!("[{}]", partial.community_id).cyan(), "failed".red()),
            }
        }
    }
    eprintln!(
        "  {} {} of {} communities contributed",
        "→".yellow(),
        answer.answered(),
        answer.intermediate.len()
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        println!("{}", answer.answer.trim());
    }
    Ok(())
}

// ============================================================================
// inspect
// ============================================================================

fn cmd_inspect(args: &InspectArgs) -> Result<()> {
    let graph = load_graph(&args.graph)
        .with_context(|| format!("failed to load graph {}", args.graph.display()))?;
    print!("{}", inspect_report(&graph, args.top));
    Ok(())
}

fn inspect_report(graph: &KnowledgeGraph, top: usize) -> String {
    let degrees = graph.degrees();
    let mut ranked: Vec<_> = graph
        .node_ids()
        .map(|id| (degrees[id.index()], id))
        .collect();
    ranked.sort_by(|(da, a), (db, b)| db.cmp(da).then(a.cmp(b)));

    let mut out = format!(
        "entities: {}\nrelationships: {}\n",
        graph.node_count(),
        graph.edge_count()
    );
    if top > 0 && !ranked.is_empty() {
        out.push_str("top entities by weighted degree:\n");
        for (degree, id) in ranked.into_iter().take(top) {
            out.push_str(&format!("  {:>4}  {}\n", degree, graph.name(id)));
        }
    }
    out
}
