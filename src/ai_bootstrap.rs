// src/ai_bootstrap.rs
use crate::analyze::ai_adapter::{build_client_from_config, DynAnalysisClient};
use crate::analyze::recover::recover;
use crate::analyze::request::{Prompt, OUTPUT_INSTRUCTIONS};
use crate::config::ai::AiConfig;
use tracing::{info, warn};

/// Set to `1` to send one synthetic batch at startup.
pub const ENV_AI_STARTUP_CHECK: &str = "AI_STARTUP_CHECK";

/// Loaded AI config plus the client built from it.
pub struct AiRuntime {
    pub cfg: AiConfig,
    pub client: DynAnalysisClient,
}

impl AiRuntime {
    /// `AI_CONFIG_PATH` → `config/ai.json` → defaults (disabled).
    pub fn load_default() -> anyhow::Result<Self> {
        Ok(Self::from_config(AiConfig::load_default()?))
    }

    pub fn from_config(cfg: AiConfig) -> Self {
        // Safe diagnostics: only provider + enabled + key length
        info!(
            provider = %cfg.provider,
            model = %cfg.model,
            enabled = cfg.enabled,
            key_len = cfg.api_key.len(),
            "AI cfg loaded"
        );
        let client = build_client_from_config(&cfg);
        Self { cfg, client }
    }

    pub fn startup_check_requested() -> bool {
        std::env::var(ENV_AI_STARTUP_CHECK).is_ok_and(|v| v.trim() == "1")
    }

    /// Send one synthetic batch and log which recovery outcome it produced.
    /// Returns that outcome's kind; `None` when AI is disabled or the call failed.
    pub async fn startup_check(&self) -> Option<&'static str> {
        if !self.cfg.enabled {
            warn!("AI startup check skipped: AI is disabled in config");
            return None;
        }
        let prompt = Prompt {
            system: OUTPUT_INSTRUCTIONS.to_string(),
            user: r#"{"messages":[{"index":0,"text":"hi, thx for waiting!! here is you're bundle","replyTimeMinutes":3.0}],"guidelines":[{"title":"Be polite","description":"Greet and thank the customer.","category":"general"}]}"#.to_string(),
        };
        match self.client.complete(&prompt).await {
            Ok(raw) => {
                let outcome = recover(&raw).kind();
                info!(
                    provider = self.client.provider_name(),
                    outcome,
                    "AI startup check finished"
                );
                Some(outcome)
            }
            Err(e) => {
                warn!(
                    provider = self.client.provider_name(),
                    error = %e,
                    "AI startup check failed"
                );
                None
            }
        }
    }
}
