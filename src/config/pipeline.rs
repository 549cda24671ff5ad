// src/config/pipeline.rs
//! Pipeline tuning + exact rule table, loaded from TOML.
//!
//! ```toml
//! min_batch_size = 50
//! max_input_tokens = 24000
//! inter_call_delay_ms = 1000
//!
//! [[exact_rules]]
//! guideline = "reply-within-5-minutes"   # id or title
//! kind = "reply_time_exceeds"
//! minutes = 5
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::analyze::exact::ExactRule;

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";

/// Batches never go below this many messages, whatever the token budget says.
pub const MIN_BATCH_SIZE: usize = 50;

/// One `[[exact_rules]]` entry: which guideline it scores and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactRuleConfig {
    /// Guideline id or title.
    pub guideline: String,
    #[serde(flatten)]
    pub rule: ExactRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_batch_size: usize,
    /// Explicit batch size; overrides the token-budget derivation (still floored).
    pub batch_size: Option<usize>,
    /// Input budget of the analysis service per request, in tokens.
    pub max_input_tokens: usize,
    /// Estimated tokens of per-message metadata (index, reply time, price).
    pub message_overhead_tokens: usize,
    /// Pause between consecutive service calls.
    pub inter_call_delay_ms: u64,
    /// Upper bound for a single service call.
    pub call_timeout_ms: u64,
    pub max_examples_per_item: usize,
    /// Derive reply-time rules from guideline wording at load time.
    pub infer_reply_time_rules: bool,
    pub exact_rules: Vec<ExactRuleConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_batch_size: MIN_BATCH_SIZE,
            batch_size: None,
            max_input_tokens: 24_000,
            message_overhead_tokens: 16,
            inter_call_delay_ms: 1_000,
            call_timeout_ms: 90_000,
            max_examples_per_item: 20,
            infer_reply_time_rules: true,
            exact_rules: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s)?;
        Ok(cfg.sanitized())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing pipeline config {}", path.display()))
    }

    /// Load using env var + fallbacks:
    /// 1) $PIPELINE_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!(
                    "PIPELINE_CONFIG_PATH points to non-existent path"
                ));
            }
        }
        let toml_p = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        Ok(Self::default())
    }

    /// Clamp values that would make batching or scoring degenerate.
    pub fn sanitized(mut self) -> Self {
        self.min_batch_size = self.min_batch_size.max(MIN_BATCH_SIZE);
        if self.batch_size == Some(0) {
            self.batch_size = None;
        }
        if self.max_input_tokens == 0 {
            self.max_input_tokens = Self::default().max_input_tokens;
        }
        if self.call_timeout_ms == 0 {
            self.call_timeout_ms = Self::default().call_timeout_ms;
        }
        self.exact_rules.retain(|r| !r.guideline.trim().is_empty());
        self
    }
}
