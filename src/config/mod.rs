// src/config/mod.rs
pub mod ai;
pub mod pipeline;

pub use ai::AiConfig;
pub use pipeline::{ExactRuleConfig, PipelineConfig, MIN_BATCH_SIZE};
