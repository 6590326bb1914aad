use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use graphrag_graph::{save_graph, CommunitySummaryRecord, CommunitySummarySet, GraphBuilder, Triple};

fn graphrag_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_graphrag"))
}

fn run(args: &[&str], cwd: &Path) -> Output {
    Command::new(graphrag_bin())
        .args(args)
        .current_dir(cwd)
        .env("RUST_LOG", "off")
        .env_remove("GRAPHRAG_BACKEND")
        .env_remove("GRAPHRAG_CONCURRENCY")
        .output()
        .expect("run graphrag")
}

#[test]
fn help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(&["--help"], dir.path());
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for cmd in ["index", "query", "inspect"] {
        assert!(stdout.contains(cmd), "missing {cmd} in help");
    }
}

#[test]
fn index_of_a_missing_file_fails_without_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(&["index", "--input", "missing.md", "--output-dir", "out"], dir.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("missing.md"));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn query_without_summaries_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(&["query", "--query", "What is this about?"], dir.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
}

#[test]
fn inspect_prints_counts_and_top_entities() {
    let dir = tempfile::tempdir().unwrap();
    let mut builder = GraphBuilder::new();
    builder.ingest(&[
        Triple::new("GraphRAG", "extends", "RAG"),
        Triple::new("GraphRAG", "uses", "Leiden"),
        Triple::new("Leiden", "refines", "Louvain"),
    ]);
    let path = dir.path().join("knowledge_graph.json");
    save_graph(&builder.finish(), &path).unwrap();

    let out = run(
        &["inspect", "--graph", path.to_str().unwrap(), "--top", "1"],
        dir.path(),
    );
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("entities: 4"));
    assert!(stdout.contains("relationships: 3"));
    assert!(stdout.lines().last().unwrap().ends_with("GraphRAG"));
}

/// Every map call fails (nothing listens on the port), so no answer is derivable.
#[cfg(feature = "llm-ollama")]
#[test]
fn unreachable_backend_exits_with_no_answer_code() {
    let dir = tempfile::tempdir().unwrap();
    let summaries = CommunitySummarySet::new(vec![CommunitySummaryRecord::new(
        0,
        vec!["GraphRAG".into(), "RAG".into()],
        "GraphRAG extends RAG.",
    )])
    .unwrap();
    let path = dir.path().join("community_summaries.json");
    summaries.save(&path).unwrap();

    let out = run(
        &[
            "query",
            "--query",
            "What is this about?",
            "--summaries",
            path.to_str().unwrap(),
            "--backend",
            "ollama",
            "--ollama-host",
            "http://127.0.0.1:9",
            "--max-attempts",
            "1",
            "--timeout-secs",
            "5",
        ],
        dir.path(),
    );
    assert_eq!(out.status.code(), Some(2));
    assert!(out.stdout.is_empty());
}
