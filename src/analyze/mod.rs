// src/analyze/mod.rs
//! Analysis pipeline: batching, request/recovery around the analysis service,
//! aggregation, exact rules, merge and scoring.
//!
//! Order inside one run:
//! 1) plan batches (`batch`)
//! 2) per batch: build request (`request`) → call service (`ai_adapter`) → `recover`
//! 3) fold outcomes (`aggregate`)
//! 4) exact counts over the same messages (`exact`), `merge`
//! 5) `scoring`

pub mod aggregate;
pub mod ai_adapter;
pub mod batch;
pub mod exact;
pub mod merge;
pub mod pipeline;
pub mod recover;
pub mod request;
pub mod scoring;

// Re-export convenient types.
pub use crate::analyze::aggregate::{aggregate, BatchResult, CorpusTally};
pub use crate::analyze::ai_adapter::{
    build_client_from_config, AnalysisClient, DynAnalysisClient, MockProvider,
};
pub use crate::analyze::batch::{Batch, BatchPlanner};
pub use crate::analyze::exact::{ExactCount, ExactRule, ExactRuleEngine};
pub use crate::analyze::pipeline::{Pipeline, RunPhase};
pub use crate::analyze::recover::recover;
pub use crate::analyze::request::{AnalysisRequest, AnalysisRequestBuilder, Prompt};
pub use crate::analyze::scoring::{aggregate_score, score};
