//! Pipeline orchestration: one run over one corpus snapshot.
//!
//! Batches are requested strictly one after another with a fixed pause between
//! calls. Each call has its own timeout; a batch that fails is recorded as
//! `Failed` and the run moves on. Everything after the request loop is a pure
//! function of the collected outcomes.

use std::fmt;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::analyze::aggregate::{aggregate, BatchResult};
use crate::analyze::ai_adapter::DynAnalysisClient;
use crate::analyze::batch::{Batch, BatchPlanner};
use crate::analyze::exact::ExactRuleEngine;
use crate::analyze::merge::merge;
use crate::analyze::recover::recover;
use crate::analyze::request::AnalysisRequestBuilder;
use crate::analyze::scoring::aggregate_score;
use crate::config::PipelineConfig;
use crate::error::{ServiceError, Warning};
use crate::guidelines::GuidelineIndex;
use crate::metrics::{describe_analysis_metrics, BATCHES_TOTAL, BATCH_DURATION_MS, RUNS_TOTAL};
use crate::model::{AnalysisOutcome, Guideline, MessageRecord};
use crate::report::{BatchFailure, BatchSummary, RunReport, RunStatus};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Planned,
    Requesting(usize),
    Recovering(usize),
    Aggregating,
    Merging,
    Scored { partial: bool },
}

impl RunPhase {
    pub fn can_advance_to(&self, next: &RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Planned, Requesting(0)) | (Planned, Aggregating) => true,
            (Requesting(i), Recovering(j)) => i == j,
            (Requesting(_), Aggregating) => true,
            (Recovering(i), Requesting(j)) => *j == i + 1,
            (Requesting(i), Requesting(j)) => *j == i + 1,
            (Recovering(_), Aggregating) => true,
            (Aggregating, Merging) => true,
            (Merging, Scored { .. }) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Scored { .. })
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Planned => write!(f, "planned"),
            RunPhase::Requesting(i) => write!(f, "requesting({i})"),
            RunPhase::Recovering(i) => write!(f, "recovering({i})"),
            RunPhase::Aggregating => write!(f, "aggregating"),
            RunPhase::Merging => write!(f, "merging"),
            RunPhase::Scored { partial: false } => write!(f, "scored"),
            RunPhase::Scored { partial: true } => write!(f, "scored(partial)"),
        }
    }
}

struct PhaseTracker {
    phase: RunPhase,
    run_id: String,
}

impl PhaseTracker {
    fn new(run_id: String) -> Self {
        Self {
            phase: RunPhase::Planned,
            run_id,
        }
    }

    fn advance(&mut self, next: RunPhase) {
        if !self.phase.can_advance_to(&next) {
            warn!(target: "analysis", run = %self.run_id, from = %self.phase, to = %next, "unexpected phase transition");
        }
        debug!(target: "analysis", run = %self.run_id, from = %self.phase, to = %next, "phase");
        self.phase = next;
    }
}

/// Short anonymised id for log lines; message text itself is never logged.
pub fn short_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

pub struct Pipeline {
    client: DynAnalysisClient,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(client: DynAnalysisClient, config: PipelineConfig) -> Self {
        Self {
            client,
            config: config.sanitized(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    /// Analyse `corpus` against `guidelines`. Never fails: corpus-level problems
    /// come back as a report with `status` no_data/failed.
    pub async fn run(&self, corpus: &[MessageRecord], guidelines: &[Guideline]) -> RunReport {
        describe_analysis_metrics();

        let index = GuidelineIndex::build(guidelines);
        let mut warnings: Vec<Warning> = index.warnings().to_vec();
        warnings.extend(corpus.iter().enumerate().filter_map(|(i, m)| {
            m.invariant_violation().map(|reason| Warning::InvalidRecord {
                index: i,
                reason: reason.to_string(),
            })
        }));

        if corpus.is_empty() {
            info!(target: "analysis", guidelines = index.len(), "empty corpus; nothing to analyse");
            counter!(RUNS_TOTAL, "status" => RunStatus::NoData.as_str()).increment(1);
            return RunReport::no_data(warnings);
        }

        let run_id = short_id(&format!(
            "{}:{}:{}",
            corpus.len(),
            corpus[0].timestamp_utc,
            corpus[corpus.len() - 1].text
        ));
        let mut phase = PhaseTracker::new(run_id.clone());

        let planner = BatchPlanner::from_config(&self.config);
        let batches = planner.plan(corpus);
        info!(
            target: "analysis",
            run = %run_id,
            messages = corpus.len(),
            batches = batches.len(),
            guidelines = index.len(),
            provider = self.client.provider_name(),
            "run planned"
        );

        let (engine, rule_warnings) = ExactRuleEngine::resolve(
            &self.config.exact_rules,
            &index,
            self.config.infer_reply_time_rules,
        );
        warnings.extend(rule_warnings);

        let builder = AnalysisRequestBuilder::new(&index);
        let mut results: Vec<BatchResult> = Vec::with_capacity(batches.len());
        for batch in &batches {
            if batch.index > 0 && self.config.inter_call_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.inter_call_delay_ms)).await;
            }
            phase.advance(RunPhase::Requesting(batch.index));
            let outcome = self.analyse_batch(&builder, batch, &mut phase).await;
            results.push(BatchResult {
                batch: batch.index,
                offset: batch.offset,
                len: batch.len(),
                outcome,
            });
        }

        phase.advance(RunPhase::Aggregating);
        let max_examples = self.config.max_examples_per_item;
        let tally = aggregate(&index, &results, max_examples);
        warnings.extend(tally.warnings.iter().cloned());

        phase.advance(RunPhase::Merging);
        // Exact counts cover the same messages as the qualitative counts they replace.
        let covered: Vec<(usize, &MessageRecord)> = results
            .iter()
            .filter(|r| r.outcome.covers_guidelines())
            .flat_map(|r| {
                corpus[r.offset..r.offset + r.len]
                    .iter()
                    .enumerate()
                    .map(move |(i, m)| (r.offset + i, m))
            })
            .collect();
        let exact = engine.evaluate(&covered, max_examples);
        let categories = merge(&index, &tally.items, &exact);

        let guideline_issues: u64 = categories.iter().map(|t| t.total_violations).sum();
        let score = aggregate_score(
            tally.grammar.total(),
            tally.grammar_messages,
            guideline_issues,
            tally.guideline_messages,
        );

        let (status, failure) = RunReport::status_for(&results);
        phase.advance(RunPhase::Scored {
            partial: status != RunStatus::Scored,
        });

        let batch_summary = BatchSummary::from_results(&results);
        let failures: Vec<BatchFailure> = results.iter().filter_map(BatchFailure::from_result).collect();

        counter!(RUNS_TOTAL, "status" => status.as_str()).increment(1);
        info!(
            target: "analysis",
            run = %run_id,
            status = status.as_str(),
            batches = %batch_summary.describe(),
            grammar_score = ?score.grammar_score,
            guidelines_score = ?score.guidelines_score,
            overall_score = ?score.overall_score,
            warnings = warnings.len(),
            "run finished"
        );

        RunReport {
            status,
            score,
            grammar: tally.grammar,
            categories,
            summary: batch_summary.describe(),
            batches: batch_summary,
            failures,
            failure,
            warnings,
            total_messages: corpus.len(),
            analyzed_messages: tally.guideline_messages,
        }
    }

    async fn analyse_batch(
        &self,
        builder: &AnalysisRequestBuilder<'_>,
        batch: &Batch<'_>,
        phase: &mut PhaseTracker,
    ) -> AnalysisOutcome {
        let prompt = builder.build(batch).render();
        let request_id = short_id(&prompt.user);
        let started = Instant::now();
        let timeout_ms = self.config.call_timeout_ms;

        let reply = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.client.complete(&prompt),
        )
        .await
        .unwrap_or(Err(ServiceError::Timeout(timeout_ms)));

        let outcome = match reply {
            Ok(raw) => {
                phase.advance(RunPhase::Recovering(batch.index));
                recover(&raw)
            }
            Err(e) => {
                warn!(target: "analysis", batch = batch.index, request = %request_id, error = %e, "analysis call failed");
                AnalysisOutcome::Failed {
                    reason: e.into(),
                    raw: String::new(),
                }
            }
        };

        let ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(BATCH_DURATION_MS).record(ms);
        counter!(BATCHES_TOTAL, "outcome" => outcome.kind()).increment(1);
        info!(
            target: "analysis",
            batch = batch.index,
            offset = batch.offset,
            messages = batch.len(),
            request = %request_id,
            outcome = outcome.kind(),
            elapsed_ms = ms as u64,
            "batch analysed"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::MockProvider;
    use crate::model::Category;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn corpus(n: usize) -> Vec<MessageRecord> {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        (0..n)
            .map(|i| MessageRecord::new(format!("message {i}"), t0).with_reply_time(1.0))
            .collect()
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            inter_call_delay_ms: 0,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn legal_phase_sequence() {
        use RunPhase::*;
        let seq = [
            Planned,
            Requesting(0),
            Recovering(0),
            Requesting(1),
            Aggregating,
            Merging,
            Scored { partial: true },
        ];
        for w in seq.windows(2) {
            assert!(w[0].can_advance_to(&w[1]), "{} -> {}", w[0], w[1]);
        }
        assert!(seq[6].is_terminal());
        assert!(!Planned.can_advance_to(&Merging));
        assert!(!Requesting(0).can_advance_to(&Recovering(1)));
    }

    #[test]
    fn short_id_is_hex_and_stable() {
        let a = short_id("hello");
        assert_eq!(a.len(), 12);
        assert_eq!(a, short_id("hello"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn empty_corpus_short_circuits() {
        let mock = Arc::new(MockProvider::fixed(MockProvider::EMPTY_REPORT));
        let p = Pipeline::new(mock.clone(), fast_config());
        let g = [Guideline::new("g", "Be polite", "", Category::General)];
        let report = p.run(&[], &g).await;
        assert_eq!(report.status, RunStatus::NoData);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn clean_reply_scores_100() {
        let mock = Arc::new(MockProvider::fixed(MockProvider::EMPTY_REPORT));
        let p = Pipeline::new(mock.clone(), fast_config());
        let g = [Guideline::new("g", "Be polite", "", Category::General)];
        let report = p.run(&corpus(120), &g).await;
        assert_eq!(report.status, RunStatus::Scored);
        assert_eq!(mock.calls(), 1);
        assert_eq!(report.score.overall_score, Some(100));
        assert_eq!(report.analyzed_messages, 120);
    }

    #[tokio::test]
    async fn invalid_records_become_warnings() {
        let mock = Arc::new(MockProvider::fixed(MockProvider::EMPTY_REPORT));
        let p = Pipeline::new(mock, fast_config());
        let mut c = corpus(3);
        c[1].reply_time_minutes = -2.0;
        let report = p.run(&c, &[]).await;
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::InvalidRecord { index: 1, .. })));
    }
}
