//! Bounded evidence retrieval loop.
//!
//! Each iteration walks `Planning → Searching → Scoring → Evaluating` and then either stops or
//! re-plans. The stop decision ([`next_transition`]) and the best-evidence bookkeeping
//! ([`BestEvidence::offer`]) are pure functions over already-computed iteration results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info};

use super::domain::{EvaluationResult, IterationRecord, ScoreRequest, Snippet};
use super::evaluator::RetrievalEvaluator;
use super::planner::StrategyPlanner;
use super::relevance::{evidence_text, ResultScorer};
use super::search::SearchAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPhase {
    Planning,
    Searching,
    Scoring,
    Evaluating,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EvidenceAccepted,
    IterationCapReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Replan,
    Stop(StopReason),
}

/// Decides what follows an evaluated iteration. `completed` counts iterations run so far.
pub fn next_transition(
    evaluation: &EvaluationResult,
    completed: usize,
    max_iterations: usize,
) -> Transition {
    if !evaluation.needs_refinement {
        Transition::Stop(StopReason::EvidenceAccepted)
    } else if completed >= max_iterations {
        Transition::Stop(StopReason::IterationCapReached)
    } else {
        Transition::Replan
    }
}

/// Highest-relevance evidence seen so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BestEvidence {
    pub relevance: f64,
    pub text: String,
    pub sources: Vec<Snippet>,
    pub iteration: Option<usize>,
}

impl BestEvidence {
    /// Replaces the current best only when `relevance` is strictly greater; ties keep the
    /// earlier evidence. Returns whether the offer was taken.
    pub fn offer(
        &mut self,
        iteration: usize,
        relevance: f64,
        text: String,
        sources: Vec<Snippet>,
    ) -> bool {
        if relevance > self.relevance {
            self.relevance = relevance;
            self.text = text;
            self.sources = sources;
            self.iteration = Some(iteration);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Result of a completed retrieval loop.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub best: BestEvidence,
    pub history: Vec<IterationRecord>,
    pub stop_reason: StopReason,
}

impl RetrievalOutcome {
    pub fn iterations(&self) -> usize {
        self.history.len()
    }
}

/// Shared flag a caller flips to abandon an in-flight request.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("retrieval cancelled after {completed} iteration(s)")]
    Cancelled { completed: usize },
}

/// Orchestrates planner, aggregator, scorer, and evaluator across bounded iterations.
pub struct EvidenceRetrievalController {
    planner: StrategyPlanner,
    aggregator: SearchAggregator,
    scorer: ResultScorer,
    evaluator: RetrievalEvaluator,
    max_iterations: usize,
    top_snippets: usize,
}

struct IterationResult {
    queries: Vec<String>,
    evidence: String,
    sources: Vec<Snippet>,
    evaluation: EvaluationResult,
}

impl EvidenceRetrievalController {
    pub fn new(
        planner: StrategyPlanner,
        aggregator: SearchAggregator,
        scorer: ResultScorer,
        evaluator: RetrievalEvaluator,
        max_iterations: usize,
        top_snippets: usize,
    ) -> Self {
        Self {
            planner,
            aggregator,
            scorer,
            evaluator,
            max_iterations: max_iterations.max(1),
            top_snippets: top_snippets.max(1),
        }
    }

    /// Runs the loop to completion. Only cancellation ends it early; every search or model
    /// failure is absorbed into a zero-signal step.
    pub async fn run(
        &self,
        request: &ScoreRequest,
        cancel: &CancelFlag,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let mut history: Vec<IterationRecord> = Vec::new();
        let mut best = BestEvidence::default();

        loop {
            if cancel.is_cancelled() {
                return Err(RetrievalError::Cancelled {
                    completed: history.len(),
                });
            }

            let iteration = history.len() + 1;
            let result = self.run_iteration(request, &history, iteration).await;

            let improved = best.offer(
                iteration,
                result.evaluation.relevance_score,
                result.evidence,
                result.sources,
            );
            info!(
                district = %request.district,
                topic = %request.topic,
                iteration,
                queries = result.queries.len(),
                relevance = result.evaluation.relevance_score,
                needs_refinement = result.evaluation.needs_refinement,
                improved,
                "retrieval iteration evaluated"
            );

            let transition =
                next_transition(&result.evaluation, iteration, self.max_iterations);
            history.push(IterationRecord {
                queries: result.queries,
                evaluation: result.evaluation,
            });

            if let Transition::Stop(stop_reason) = transition {
                debug!(phase = ?RetrievalPhase::Done, ?stop_reason, iteration, "retrieval finished");
                return Ok(RetrievalOutcome {
                    best,
                    history,
                    stop_reason,
                });
            }
        }
    }

    async fn run_iteration(
        &self,
        request: &ScoreRequest,
        history: &[IterationRecord],
        iteration: usize,
    ) -> IterationResult {
        debug!(phase = ?RetrievalPhase::Planning, iteration, "retrieval phase");
        let queries = self.planner.plan(request, history).await;

        debug!(phase = ?RetrievalPhase::Searching, iteration, queries = queries.len(), "retrieval phase");
        let pooled: Vec<Snippet> = join_all(queries.iter().map(|query| self.aggregator.fetch(query)))
            .await
            .into_iter()
            .flatten()
            .collect();

        debug!(phase = ?RetrievalPhase::Scoring, iteration, pooled = pooled.len(), "retrieval phase");
        let ranked = self
            .scorer
            .rank(pooled, &request.topic, &request.district, self.top_snippets);
        let evidence = evidence_text(&ranked);
        let sources = ranked.into_iter().map(|scored| scored.into_snippet()).collect();

        debug!(phase = ?RetrievalPhase::Evaluating, iteration, "retrieval phase");
        let evaluation = self.evaluator.evaluate(request, &evidence).await;

        IterationResult {
            queries,
            evidence,
            sources,
            evaluation,
        }
    }
}
