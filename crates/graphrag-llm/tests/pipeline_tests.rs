//! Pipeline behavior under injected generation failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use graphrag_graph::{CommunitySummaryRecord, CommunitySummarySet};
use graphrag_ingest::Chunk;
use graphrag_llm::{
    FnGenerator, GenerationError, GenerationRequest, IndexPipeline, PipelineConfig, QueryConfig,
    QueryError, QuerySynthesizer, ResilientGenerator, RetryPolicy, ScriptedGenerator,
};
use proptest::prelude::*;

fn summary_set(n: u32) -> CommunitySummarySet {
    CommunitySummarySet::new(
        (0..n)
            .map(|id| CommunitySummaryRecord::new(id, vec![format!("node-{id}")], format!("summary #{id}#")))
            .collect(),
    )
    .expect("unique ids")
}

fn community_of(prompt: &str) -> Option<u32> {
    let start = prompt.find("summary #")? + "summary #".len();
    let end = prompt[start..].find('#')? + start;
    prompt[start..end].parse().ok()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Exactly k intermediate results in id order, whichever calls fail.
    #[test]
    fn map_stage_is_complete_under_failures(
        k in 1u32..24,
        failing in proptest::collection::btree_set(0u32..24, 0..24),
        concurrency in 1usize..6,
    ) {
        let failing_in_run = failing.clone();
        let generator = Arc::new(FnGenerator::new(move |req: &GenerationRequest| {
            match community_of(&req.prompt) {
                Some(id) if failing_in_run.contains(&id) => {
                    Err(GenerationError::Transient(format!("community {id} down")))
                }
                Some(id) => Ok(format!("answer {id}")),
                None => Err(GenerationError::Permanent("unexpected prompt".into())),
            }
        }));
        let config = QueryConfig { concurrency, ..QueryConfig::default() };
        let q = QuerySynthesizer::new(generator, config);
        let out = runtime().block_on(q.map_stage("q", &summary_set(k)));

        prop_assert_eq!(out.len(), k as usize);
        for (i, answer) in out.iter().enumerate() {
            prop_assert_eq!(answer.community_id, i as u32);
            prop_assert_eq!(answer.is_answered(), !failing.contains(&(i as u32)));
        }
    }
}

#[tokio::test]
async fn reduce_is_never_called_when_every_map_call_fails() {
    let reduce_calls = Arc::new(AtomicUsize::new(0));
    let seen = reduce_calls.clone();
    let generator = Arc::new(FnGenerator::new(move |req: &GenerationRequest| {
        if req.prompt.contains("Partial answers:") {
            seen.fetch_add(1, Ordering::SeqCst);
            return Ok("should not happen".into());
        }
        Err(GenerationError::Timeout(Duration::from_secs(1)))
    }));
    let q = QuerySynthesizer::new(generator, QueryConfig::default());
    let err = q.answer("q", &summary_set(5)).await.unwrap_err();

    assert!(matches!(err, QueryError::NoAnswerDerivable { communities: 5 }));
    assert_eq!(reduce_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reduce_sees_answers_in_community_order() {
    let generator = Arc::new(ScriptedGenerator::new(
        (0..3)
            .map(|_| Ok("partial".to_string()))
            .chain(std::iter::once(Ok("combined".to_string()))),
    ));
    let q = QuerySynthesizer::new(generator.clone(), QueryConfig::default());
    let answer = q.answer("q", &summary_set(3)).await.unwrap();
    assert_eq!(answer.answer, "combined");

    let prompts = generator.prompts();
    let reduce = prompts.last().unwrap();
    let positions: Vec<usize> = (0..3)
        .map(|id| reduce.find(&format!("[Community {id}]")).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn transient_extraction_failures_recover_through_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let flaky = FnGenerator::new(move |req: &GenerationRequest| {
        if req.prompt.starts_with("Extract") && seen.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(GenerationError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            });
        }
        if req.prompt.starts_with("Extract") {
            Ok("Relationships:\n- Leiden -> refines -> Louvain".into())
        } else {
            Ok("Leiden refines Louvain.".into())
        }
    });
    let policy = RetryPolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..RetryPolicy::exponential()
    };
    let generator = Arc::new(ResilientGenerator::new(flaky, policy, None));
    let pipeline = IndexPipeline::new(generator, PipelineConfig::default());
    let chunk = Chunk::new("paper", 0, "Leiden refines Louvain.", 0, 23);
    let output = pipeline.run(vec![chunk]).await.unwrap();

    assert_eq!(output.report.extraction.failed, 0);
    assert_eq!(output.graph.node_count(), 2);
    assert_eq!(output.summaries.len(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn one_failed_summary_keeps_the_run() {
    let generator = Arc::new(FnGenerator::new(|req: &GenerationRequest| {
        if req.prompt.starts_with("Extract") {
            if req.prompt.contains("first") {
                Ok("- A -> knows -> B".into())
            } else {
                Ok("- C -> knows -> D".into())
            }
        } else if req.prompt.contains("- C") {
            Err(GenerationError::Permanent("filtered".into()))
        } else {
            Ok("A knows B.".into())
        }
    }));
    let pipeline = IndexPipeline::new(generator, PipelineConfig::default());
    let chunks = vec![
        Chunk::new("doc", 0, "first", 0, 5),
        Chunk::new("doc", 1, "second", 5, 11),
    ];
    let output = pipeline.run(chunks).await.unwrap();

    assert_eq!(output.communities.len(), 2);
    assert_eq!(output.report.summaries_failed, vec![1]);
    assert_eq!(
        output.summaries.get(1).unwrap().summary,
        graphrag_llm::SUMMARY_FAILURE_PLACEHOLDER
    );
    assert!(output.summaries.get(1).unwrap().failed);
    assert!(!output.summaries.get(0).unwrap().failed);
}
