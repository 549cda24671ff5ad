// tests/pipeline_scenarios.rs
//
// End-to-end runs of the pipeline against scripted analysis clients.
// No network; every reply is fixed in the test.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use chat_compliance::ai_adapter::{AnalysisClient, DisabledClient, MockProvider, ServiceFuture};
use chat_compliance::analyze::request::Prompt;
use chat_compliance::config::PipelineConfig;
use chat_compliance::model::CountSource;
use chat_compliance::{
    Category, FailureReason, Guideline, MessageRecord, Pipeline, RunFailure, RunStatus, Warning,
};

fn corpus(n: usize) -> Vec<MessageRecord> {
    let t0 = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            MessageRecord::new(format!("hello, here is offer {i}"), t0)
                .with_reply_time(2.0)
                .with_counterparty(format!("fan-{}", i % 7))
        })
        .collect()
}

fn guidelines() -> Vec<Guideline> {
    vec![
        Guideline::new(
            "reply-fast",
            "Reply within 5 minutes",
            "Answer every customer within 5 minutes.",
            Category::General,
        ),
        Guideline::new("polite", "Be polite", "Greet and thank the customer.", Category::General),
        Guideline::new("bundle", "Offer bundles", "Suggest a bundle when selling.", Category::Sales),
    ]
}

fn config() -> PipelineConfig {
    PipelineConfig {
        inter_call_delay_ms: 0,
        ..PipelineConfig::default()
    }
}

fn batched(size: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size: Some(size),
        ..config()
    }
}

const ONE_POLITE_ONE_TYPO: &str = r#"Here you go:
{"grammarBreakdown":{"spelling":{"count":1,"examples":[0]},"grammar":{"count":0,"examples":[]},"punctuation":{"count":0,"examples":[]}},
 "general":{"items":[{"title":"Be polite","count":1,"examples":[3]}]},
 "psychology":{"items":[]},"captions":{"items":[]},"sales":{"items":[]}}"#;

const PROSE: &str = "I'm sorry, but I can't evaluate these messages right now.";

/// Never answers within any reasonable timeout.
struct SlowClient;

impl AnalysisClient for SlowClient {
    fn complete<'a>(&'a self, _prompt: &'a Prompt) -> ServiceFuture<'a> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(MockProvider::EMPTY_REPORT.to_string())
        })
    }
    fn provider_name(&self) -> &'static str {
        "slow"
    }
}

#[tokio::test]
async fn exact_reply_time_count_replaces_model_zero() {
    let mut msgs = corpus(100);
    for i in [10, 20, 30, 40, 50] {
        msgs[i].reply_time_minutes = 8.0;
    }
    let reply = r#"{"grammarBreakdown":{"spelling":0,"grammar":0,"punctuation":0},
        "general":{"items":[{"title":"Reply within 5 minutes","count":0,"examples":[]}]},
        "psychology":{"items":[]},"captions":{"items":[]},"sales":{"items":[]}}"#;
    let mock = Arc::new(MockProvider::fixed(reply));
    let report = Pipeline::new(mock.clone(), config()).run(&msgs, &guidelines()).await;

    assert_eq!(mock.calls(), 1, "100 short messages fit one batch");
    assert_eq!(report.status, RunStatus::Scored);

    let general = report.tally(Category::General).unwrap();
    let item = general.items.iter().find(|i| i.guideline_id == "reply-fast").unwrap();
    assert_eq!(item.count, 5);
    assert_eq!(item.source, CountSource::Exact);
    assert_eq!(item.qualitative_count, Some(0));
    assert_eq!(item.example_indices, vec![10, 20, 30, 40, 50]);

    assert_eq!(report.grammar.total(), 0);
    assert_eq!(report.score.grammar_score, Some(100));
    assert_eq!(report.score.guidelines_score, Some(75));
    assert_eq!(report.score.overall_score, Some(88));
}

#[tokio::test]
async fn configured_rule_works_without_inference() {
    let mut msgs = corpus(60);
    msgs[4] = msgs[4].clone().with_price(3.0, Some(false));
    msgs[9] = msgs[9].clone().with_price(12.0, Some(true));
    let cfg = PipelineConfig::from_toml_str(
        r#"
inter_call_delay_ms = 0
infer_reply_time_rules = false

[[exact_rules]]
guideline = "Offer bundles"
kind = "unpurchased_offer"

[[exact_rules]]
guideline = "no-such-guideline"
kind = "price_below"
amount = 5.0
"#,
    )
    .unwrap();
    let mock = Arc::new(MockProvider::fixed(MockProvider::EMPTY_REPORT));
    let report = Pipeline::new(mock, cfg).run(&msgs, &guidelines()).await;

    let sales = report.tally(Category::Sales).unwrap();
    assert_eq!(sales.total_violations, 1);
    assert_eq!(sales.items[0].example_indices, vec![4]);
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::UnknownRuleTarget { target } if target == "no-such-guideline")));
    // reply-fast has no rule when inference is off, and the model listed nothing
    let general = report.tally(Category::General).unwrap();
    assert_eq!(general.items[0].source, CountSource::NotReported);
}

#[tokio::test]
async fn empty_corpus_is_no_data_without_service_calls() {
    let mock = Arc::new(MockProvider::fixed(MockProvider::EMPTY_REPORT));
    let report = Pipeline::new(mock.clone(), config()).run(&[], &guidelines()).await;

    assert_eq!(mock.calls(), 0);
    assert_eq!(report.status, RunStatus::NoData);
    assert_eq!(report.failure, Some(RunFailure::EmptyCorpus));
    assert_eq!(report.score.grammar_score, None);
    assert_eq!(report.score.guidelines_score, None);
    assert_eq!(report.score.overall_score, None);
}

#[tokio::test]
async fn prose_reply_on_single_batch_gives_partial_with_null_scores() {
    let mock = Arc::new(MockProvider::fixed(PROSE));
    let report = Pipeline::new(mock, config()).run(&corpus(80), &guidelines()).await;

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.batches.total, 1);
    assert_eq!(report.batches.succeeded, 0);
    assert_eq!(report.batches.failed, 1);
    assert_eq!(report.analyzed_messages, 0);
    assert_eq!(report.score.overall_score, None);
    assert!(matches!(report.failures[0].reason, FailureReason::MalformedResponse(_)));
    assert!(report.failures[0].raw_excerpt.starts_with("I'm sorry"));
}

#[tokio::test]
async fn one_of_three_batches_failing_aggregates_the_rest() {
    let mock = Arc::new(MockProvider::scripted(
        vec![
            Ok(ONE_POLITE_ONE_TYPO.to_string()),
            Ok(PROSE.to_string()),
            Ok(ONE_POLITE_ONE_TYPO.to_string()),
        ],
        Ok(MockProvider::EMPTY_REPORT.to_string()),
    ));
    let report = Pipeline::new(mock.clone(), batched(50))
        .run(&corpus(150), &guidelines())
        .await;

    assert_eq!(mock.calls(), 3);
    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.summary, "2/3 batches succeeded");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].batch, 1);
    assert_eq!(report.analyzed_messages, 100);

    let polite = report
        .tally(Category::General)
        .unwrap()
        .items
        .iter()
        .find(|i| i.guideline_id == "polite")
        .unwrap();
    assert_eq!(polite.count, 2);
    assert_eq!(polite.example_indices, vec![3, 103]);
    assert_eq!(report.grammar.spelling.count, 2);
    assert_eq!(report.grammar.spelling.example_indices, vec![0, 100]);

    // 2 issues over the 100 messages that were actually analysed
    assert_eq!(report.score.grammar_score, Some(90));
    assert_eq!(report.score.guidelines_score, Some(90));
}

#[tokio::test]
async fn batch_with_only_some_categories_is_left_out_of_guideline_score() {
    let full = r#"{"grammarBreakdown":{"spelling":0,"grammar":0,"punctuation":0},
        "general":{"items":[{"title":"Be polite","count":10,"examples":[0,1,2]}]},
        "psychology":{"items":[]},"captions":{"items":[]},"sales":{"items":[]}}"#;
    let cut_off = r#"{"sales":{"items":[]},"general":{"items":[{"title":"Be po"#;
    let mock = Arc::new(MockProvider::scripted(
        vec![Ok(full.to_string()), Ok(cut_off.to_string())],
        Ok(MockProvider::EMPTY_REPORT.to_string()),
    ));
    let report = Pipeline::new(mock.clone(), batched(50))
        .run(&corpus(100), &guidelines())
        .await;

    assert_eq!(mock.calls(), 2);
    assert_eq!(report.status, RunStatus::Scored);
    assert_eq!(report.batches.partially_recovered, 1);
    assert_eq!(report.analyzed_messages, 50);
    // 10 violations over the 50 messages with every category accounted for
    assert_eq!(report.score.guidelines_score, Some(0));
    assert_eq!(report.score.grammar_score, Some(100));
}

#[tokio::test]
async fn exact_counts_only_cover_analysed_batches() {
    let mut msgs = corpus(100);
    for i in [5, 7, 60] {
        msgs[i].reply_time_minutes = 30.0;
    }
    let mock = Arc::new(MockProvider::scripted(
        vec![Ok(PROSE.to_string())],
        Ok(MockProvider::EMPTY_REPORT.to_string()),
    ));
    let report = Pipeline::new(mock, batched(50)).run(&msgs, &guidelines()).await;

    let reply = &report.tally(Category::General).unwrap().items[0];
    assert_eq!(reply.guideline_id, "reply-fast");
    assert_eq!(reply.count, 1);
    assert_eq!(reply.example_indices, vec![60]);
    assert_eq!(report.score.guidelines_score, Some(90));
}

#[tokio::test]
async fn count_without_examples_is_kept_and_unverified() {
    let reply = r#"{"general":{"items":[{"title":"Be polite","count":3,"examples":[]}]}}"#;
    let mock = Arc::new(MockProvider::fixed(reply));
    let report = Pipeline::new(mock, config()).run(&corpus(100), &guidelines()).await;

    let polite = &report.tally(Category::General).unwrap().items[1];
    assert_eq!(polite.count, 3);
    assert!(polite.unverified);
    assert!(polite.example_indices.is_empty());
}

#[tokio::test]
async fn unknown_and_fuzzy_titles() {
    let reply = r#"{"general":{"items":[
        {"title":"Be polte","count":2,"examples":[1,2]},
        {"title":"Use emojis","count":9,"examples":[4]}
    ]}}"#;
    let mock = Arc::new(MockProvider::fixed(reply));
    let report = Pipeline::new(mock, config()).run(&corpus(100), &guidelines()).await;

    let general = report.tally(Category::General).unwrap();
    assert_eq!(general.items[1].guideline_id, "polite");
    assert_eq!(general.items[1].count, 2);
    assert_eq!(general.total_violations, 2, "unknown items stay out of totals");
    assert!(report.warnings.iter().any(
        |w| matches!(w, Warning::UnknownGuideline { title, count: 9, .. } if title == "Use emojis")
    ));
}

#[tokio::test]
async fn disabled_service_is_a_run_failure() {
    let report = Pipeline::new(Arc::new(DisabledClient), batched(50))
        .run(&corpus(120), &guidelines())
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failure, Some(RunFailure::ServiceOutage(3)));
    assert_eq!(report.score.overall_score, None);
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f.reason, FailureReason::ExternalServiceUnavailable(_))));
}

#[tokio::test]
async fn slow_calls_time_out_per_batch() {
    let cfg = PipelineConfig {
        call_timeout_ms: 50,
        ..config()
    };
    let started = Instant::now();
    let report = Pipeline::new(Arc::new(SlowClient), cfg)
        .run(&corpus(10), &guidelines())
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.status, RunStatus::Failed);
    assert!(matches!(
        &report.failures[0].reason,
        FailureReason::ExternalServiceUnavailable(m) if m.contains("timed out")
    ));
}

#[tokio::test]
async fn calls_are_spaced_by_the_inter_call_delay() {
    let cfg = PipelineConfig {
        inter_call_delay_ms: 40,
        batch_size: Some(50),
        ..PipelineConfig::default()
    };
    let mock = Arc::new(MockProvider::fixed(MockProvider::EMPTY_REPORT));
    let started = Instant::now();
    let report = Pipeline::new(mock.clone(), cfg).run(&corpus(150), &guidelines()).await;

    assert_eq!(mock.calls(), 3);
    // two pauses: none before the first call
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert_eq!(report.status, RunStatus::Scored);
}
