//! Offline run: `analyze_file <input.json>` where the file holds
//! `{"messages": [...], "guidelines": [...]}`. Prints the run report as JSON.

use std::path::PathBuf;

use anyhow::Context;
use chat_compliance::ai_bootstrap::AiRuntime;
use chat_compliance::config::PipelineConfig;
use chat_compliance::{Guideline, MessageRecord, Pipeline};

#[derive(serde::Deserialize)]
struct Input {
    #[serde(default)]
    messages: Vec<MessageRecord>,
    #[serde(default)]
    guidelines: Vec<Guideline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: analyze_file <input.json>")?;
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let input: Input =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let ai = AiRuntime::load_default()?;
    let pipeline = Pipeline::new(ai.client, PipelineConfig::load_default()?);
    let report = pipeline.run(&input.messages, &input.guidelines).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    eprintln!("{} ({})", report.status.as_str(), report.summary);
    Ok(())
}
