//! Error and warning taxonomy.
//!
//! Only external calls return `Err`. Everything that happens inside a run is
//! absorbed into values: a failed batch becomes `FailureReason`, a corpus-level
//! failure becomes `RunFailure`, and non-fatal anomalies become `Warning`s.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Category;

/// Failure of one call to the external analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("analysis service unavailable: {0}")]
    Unavailable(String),
    #[error("analysis service returned HTTP {0}")]
    Status(u16),
    #[error("analysis call timed out after {0} ms")]
    Timeout(u64),
    #[error("analysis service returned an empty reply")]
    EmptyReply,
    #[error("analysis client is disabled")]
    Disabled,
    #[error("daily analysis limit of {0} calls reached")]
    DailyLimit(u32),
}

/// Why a batch ended `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Reply could not be parsed or salvaged.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Call failed before a reply was received.
    #[error("external service unavailable: {0}")]
    ExternalServiceUnavailable(String),
}

impl From<ServiceError> for FailureReason {
    fn from(err: ServiceError) -> Self {
        FailureReason::ExternalServiceUnavailable(err.to_string())
    }
}

/// Corpus-level failure, returned as an explicit result instead of a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum RunFailure {
    #[error("corpus is empty, nothing to analyse")]
    EmptyCorpus,
    #[error("analysis service unavailable for all {0} batches")]
    ServiceOutage(usize),
}

/// Non-fatal anomaly recorded in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Warning {
    /// The same guideline was assigned to two categories; `kept` wins.
    CategoryConflict {
        guideline: String,
        kept: Category,
        ignored: Category,
    },
    /// The model reported a guideline under a category other than its own.
    CategoryMismatch {
        guideline: String,
        expected: Category,
        reported: Category,
        batch: usize,
    },
    /// The model reported an item that matches no active guideline.
    UnknownGuideline {
        title: String,
        category: Category,
        count: u32,
        batch: usize,
    },
    /// An example index pointed outside its batch and was dropped.
    ExampleOutOfRange {
        guideline: String,
        index: usize,
        batch: usize,
    },
    InvalidRecord {
        index: usize,
        reason: String,
    },
    /// An exact rule names a guideline that is not in the active set.
    UnknownRuleTarget {
        target: String,
    },
}

impl Warning {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CategoryConflict { .. } => "category_conflict",
            Self::CategoryMismatch { .. } => "category_mismatch",
            Self::UnknownGuideline { .. } => "unknown_guideline",
            Self::ExampleOutOfRange { .. } => "example_out_of_range",
            Self::InvalidRecord { .. } => "invalid_record",
            Self::UnknownRuleTarget { .. } => "unknown_rule_target",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_maps_to_unavailable_reason() {
        let r: FailureReason = ServiceError::Timeout(2000).into();
        assert!(matches!(r, FailureReason::ExternalServiceUnavailable(ref m) if m.contains("2000")));
    }

    #[test]
    fn warning_serializes_with_type_tag() {
        let w = Warning::CategoryConflict {
            guideline: "g1".into(),
            kept: Category::Sales,
            ignored: Category::General,
        };
        let v = serde_json::to_value(&w).unwrap();
        assert_eq!(v["type"], "category_conflict");
        assert_eq!(v["kept"], "sales");
    }
}
