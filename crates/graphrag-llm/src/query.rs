//! Global query answering (map → reduce)
//!
//! ```text
//!   summaries (k)                          intermediate (k)
//!   ┌─────────┐   map: one call each       ┌──────────────────┐
//!   │ c0 … ck │ ─────────────────────────► │ Answered/Failed  │
//!   └─────────┘   bounded concurrency      └────────┬─────────┘
//!                                                   │ reduce: one call
//!                                                   ▼
//!                                             final answer
//! ```
//!
//! The map stage always yields exactly one result per community, sorted by
//! community id, whatever the completion order. If no community produced
//! a usable answer the reduce call is skipped and the query fails.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use graphrag_graph::CommunitySummarySet;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::QueryConfig;
use crate::error::{GenerationError, QueryError};
use crate::generation::{GenerationRequest, TextGenerator};
use crate::prompts::{map_prompt, reduce_prompt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum MapOutcome {
    Answered(String),
    /// The reason, for logs and reports. Never shown to the reduce call.
    Failed(String),
}

/// One community's partial answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateAnswer {
    pub community_id: u32,
    pub outcome: MapOutcome,
}

impl IntermediateAnswer {
    pub fn is_answered(&self) -> bool {
        matches!(self.outcome, MapOutcome::Answered(_))
    }

    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            MapOutcome::Answered(text) => Some(text),
            MapOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedAnswer {
    pub query: String,
    pub answer: String,
    pub intermediate: Vec<IntermediateAnswer>,
}

impl SynthesizedAnswer {
    pub fn answered(&self) -> usize {
        self.intermediate.iter().filter(|a| a.is_answered()).count()
    }

    pub fn failed(&self) -> usize {
        self.intermediate.len() - self.answered()
    }
}

pub struct QuerySynthesizer {
    generator: Arc<dyn TextGenerator>,
    config: QueryConfig,
    temperature: Option<f32>,
}

impl QuerySynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: QueryConfig) -> Self {
        Self {
            generator,
            config,
            temperature: None,
        }
    }

    /// Sampling temperature for both map and reduce calls.
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Ask every community the query. Returns one result per summary,
    /// ascending by community id.
    ///
    /// Communities whose summary failed at indexing time (or is blank) are
    /// not queried; they are reported as failed.
    pub async fn map_stage(&self, query: &str, summaries: &CommunitySummarySet) -> Vec<IntermediateAnswer> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let map_timeout = self.config.map_timeout();
        let mut results: BTreeMap<u32, MapOutcome> = BTreeMap::new();
        let mut tasks = JoinSet::new();

        for record in summaries.iter() {
            if !record.is_usable() {
                results.insert(
                    record.community_id,
                    MapOutcome::Failed("community has no summary".into()),
                );
                continue;
            }

            let request = GenerationRequest::new(map_prompt(query, record.summary.trim()))
                .with_max_tokens(self.config.max_tokens)
                .with_temperature(self.temperature);
            let generator = Arc::clone(&self.generator);
            let semaphore = Arc::clone(&semaphore);
            let id = record.community_id;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = match map_timeout {
                    Some(limit) => tokio::time::timeout(limit, generator.generate(&request))
                        .await
                        .unwrap_or(Err(GenerationError::Timeout(limit))),
                    None => generator.generate(&request).await,
                };
                (id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(text))) if text.trim().is_empty() => {
                    tracing::warn!(community = id, "map call returned an empty answer");
                    results.insert(id, MapOutcome::Failed("empty answer".into()));
                }
                Ok((id, Ok(text))) => {
                    results.insert(id, MapOutcome::Answered(text));
                }
                Ok((id, Err(err))) => {
                    tracing::warn!(community = id, error = %err, "map call failed");
                    results.insert(id, MapOutcome::Failed(err.to_string()));
                }
                Err(e) => tracing::warn!(error = %e, "map task aborted"),
            }
        }

        summaries
            .iter()
            .map(|record| IntermediateAnswer {
                community_id: record.community_id,
                outcome: results
                    .remove(&record.community_id)
                    .unwrap_or_else(|| MapOutcome::Failed("map task aborted".into())),
            })
            .collect()
    }

    /// Combine intermediate answers with a single generation call.
    pub async fn reduce(&self, query: &str, answers: &[IntermediateAnswer]) -> Result<String, QueryError> {
        let request = GenerationRequest::new(reduce_prompt(query, answers))
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.temperature);
        self.generator
            .generate(&request)
            .await
            .map_err(QueryError::Reduce)
    }

    pub async fn answer(&self, query: &str, summaries: &CommunitySummarySet) -> Result<SynthesizedAnswer, QueryError> {
        tracing::info!(
            communities = summaries.len(),
            concurrency = self.config.concurrency,
            generator = %self.generator.describe(),
            "answering query"
        );

        let intermediate = self.map_stage(query, summaries).await;
        let answered = intermediate.iter().filter(|a| a.is_answered()).count();
        tracing::info!(
            answered,
            failed = intermediate.len() - answered,
            "map stage finished"
        );
        if answered == 0 {
            return Err(QueryError::NoAnswerDerivable {
                communities: intermediate.len(),
            });
        }

        let answer = self.reduce(query, &intermediate).await?;
        Ok(SynthesizedAnswer {
            query: query.to_string(),
            answer,
            intermediate,
        })
    }
}
