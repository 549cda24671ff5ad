use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const BATCHES_TOTAL: &str = "analysis_batches_total";
pub const RUNS_TOTAL: &str = "analysis_runs_total";
pub const BATCH_DURATION_MS: &str = "analysis_batch_duration_ms";

/// Register metric descriptions once per process. Safe to call from every run.
pub fn describe_analysis_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            BATCHES_TOTAL,
            "Analysed batches, labelled by outcome (success, partially_recovered, failed)."
        );
        describe_counter!(
            RUNS_TOTAL,
            "Pipeline runs, labelled by final status (scored, partial, no_data, failed)."
        );
        describe_histogram!(
            BATCH_DURATION_MS,
            "Time from request to recovered outcome per batch, in milliseconds."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Only one recorder may exist per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_analysis_metrics();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
