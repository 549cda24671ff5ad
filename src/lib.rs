// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod guidelines;
pub mod metrics;
pub mod model;
pub mod report;

pub mod ai_bootstrap;

// ---- Re-exports for stable public API ----
pub use crate::analyze::ai_adapter;
pub use crate::analyze::Pipeline;
pub use crate::api::create_router;
pub use crate::error::{FailureReason, RunFailure, ServiceError, Warning};
pub use crate::model::{
    AggregateScore, AnalysisOutcome, Category, CategoryTally, Guideline, MessageRecord,
    ViolationItem,
};
pub use crate::report::{RunReport, RunStatus};

