//! Run report: the single value a pipeline run produces.

use serde::{Deserialize, Serialize};

use crate::analyze::aggregate::BatchResult;
use crate::error::{FailureReason, RunFailure, Warning};
use crate::model::{AggregateScore, AnalysisOutcome, Category, CategoryTally, GrammarBreakdown};

/// Raw replies are cut to this many characters in failure entries.
pub const RAW_EXCERPT_CHARS: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every batch contributed (possibly partially recovered).
    Scored,
    /// At least one batch failed; the rest were aggregated.
    Partial,
    /// Empty corpus; nothing was analysed.
    NoData,
    /// No batch could reach the analysis service.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Scored => "scored",
            RunStatus::Partial => "partial",
            RunStatus::NoData => "no_data",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Batches that produced any data (includes `partially_recovered`).
    pub succeeded: usize,
    pub partially_recovered: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[BatchResult]) -> Self {
        results.iter().fold(
            BatchSummary {
                total: results.len(),
                ..BatchSummary::default()
            },
            |mut s, r| {
                match r.outcome {
                    AnalysisOutcome::Success { .. } => s.succeeded += 1,
                    AnalysisOutcome::PartiallyRecovered { .. } => {
                        s.succeeded += 1;
                        s.partially_recovered += 1;
                    }
                    AnalysisOutcome::Failed { .. } => s.failed += 1,
                }
                s
            },
        )
    }

    /// e.g. "2/3 batches succeeded"
    pub fn describe(&self) -> String {
        format!("{}/{} batches succeeded", self.succeeded, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub reason: FailureReason,
    pub raw_excerpt: String,
}

impl BatchFailure {
    pub fn from_result(r: &BatchResult) -> Option<Self> {
        match &r.outcome {
            AnalysisOutcome::Failed { reason, raw } => Some(BatchFailure {
                batch: r.batch,
                reason: reason.clone(),
                raw_excerpt: excerpt(raw, RAW_EXCERPT_CHARS),
            }),
            _ => None,
        }
    }
}

fn excerpt(raw: &str, max_chars: usize) -> String {
    match raw.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &raw[..cut]),
        None => raw.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub score: AggregateScore,
    pub grammar: GrammarBreakdown,
    pub categories: Vec<CategoryTally>,
    pub batches: BatchSummary,
    /// Human-readable batch line, e.g. "2/3 batches succeeded".
    pub summary: String,
    pub failures: Vec<BatchFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub warnings: Vec<Warning>,
    pub total_messages: usize,
    /// Messages whose batch contributed guideline data.
    pub analyzed_messages: usize,
}

impl RunReport {
    /// Report for an empty corpus: all scores null, no batches.
    pub fn no_data(warnings: Vec<Warning>) -> Self {
        RunReport {
            status: RunStatus::NoData,
            score: AggregateScore::empty(),
            grammar: GrammarBreakdown::default(),
            categories: Category::ALL.into_iter().map(CategoryTally::empty).collect(),
            batches: BatchSummary::default(),
            summary: BatchSummary::default().describe(),
            failures: Vec::new(),
            failure: Some(RunFailure::EmptyCorpus),
            warnings,
            total_messages: 0,
            analyzed_messages: 0,
        }
    }

    /// Status from batch outcomes. A run where every batch failed to reach the
    /// service is a corpus-level failure; any other failed batch makes it partial.
    pub fn status_for(results: &[BatchResult]) -> (RunStatus, Option<RunFailure>) {
        if results.is_empty() {
            return (RunStatus::NoData, Some(RunFailure::EmptyCorpus));
        }
        let outage = results.iter().all(|r| {
            matches!(
                r.outcome,
                AnalysisOutcome::Failed {
                    reason: FailureReason::ExternalServiceUnavailable(_),
                    ..
                }
            )
        });
        if outage {
            return (RunStatus::Failed, Some(RunFailure::ServiceOutage(results.len())));
        }
        if results.iter().any(|r| r.outcome.is_failed()) {
            (RunStatus::Partial, None)
        } else {
            (RunStatus::Scored, None)
        }
    }

    pub fn is_partial(&self) -> bool {
        self.status == RunStatus::Partial
    }

    pub fn tally(&self, category: Category) -> Option<&CategoryTally> {
        self.categories.iter().find(|t| t.category == category)
    }
}
