//! Chat Compliance Service: binary entrypoint.
//! Boots the Axum HTTP server: analysis pipeline, `/analyze`, `/health`, `/metrics`.

use chat_compliance::ai_bootstrap::AiRuntime;
use chat_compliance::api::{create_router, AppState};
use chat_compliance::config::PipelineConfig;
use chat_compliance::metrics::Metrics;
use chat_compliance::Pipeline;
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs; `RUST_LOG` overrides the default filter.
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chat_compliance=info,warn"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    // try_init: the shuttle runtime may already have installed a subscriber.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let ai = AiRuntime::load_default()?;
    if AiRuntime::startup_check_requested() {
        ai.startup_check().await;
    }
    let pipeline_cfg = PipelineConfig::load_default()?;
    info!(
        provider = ai.client.provider_name(),
        batch_floor = pipeline_cfg.min_batch_size,
        exact_rules = pipeline_cfg.exact_rules.len(),
        "pipeline configured"
    );

    let state = AppState::new(Pipeline::new(ai.client.clone(), pipeline_cfg));
    let mut router = create_router(state);

    match Metrics::init() {
        Ok(metrics) => router = router.merge(metrics.router()),
        Err(e) => warn!(error = ?e, "metrics disabled"),
    }

    Ok(router.into())
}
