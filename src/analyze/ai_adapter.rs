//! AI adapter: analysis-service abstraction + file cache + daily limit.
//!
//! The pipeline only sees `AnalysisClient`. Concrete providers do the remote
//! call; `CachingClient` wraps a provider so identical batch requests are
//! answered from disk, which keeps reruns over the same corpus reproducible.

use std::collections::VecDeque;
use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::analyze::recover::extract_balanced_object;
use crate::analyze::request::Prompt;
use crate::config::AiConfig;
use crate::error::ServiceError;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

pub type ServiceFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>>;

/// Trait object used by the pipeline (and tests).
pub trait AnalysisClient: Send + Sync {
    /// Send one rendered batch request; returns the raw text reply.
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> ServiceFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynAnalysisClient = Arc<dyn AnalysisClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a mock client answering with an all-zero report.
/// * Else if `config.enabled==false`, returns a disabled client.
/// * Else builds the real provider, wrapped with caching + daily limit when enabled.
pub fn build_client_from_config(config: &AiConfig) -> DynAnalysisClient {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockProvider::fixed(MockProvider::EMPTY_REPORT));
    }

    if !config.enabled {
        return Arc::new(DisabledClient);
    }

    match config.provider.as_str() {
        "openai" => match OpenAiProvider::new(config) {
            Ok(provider) if config.cache_enabled => Arc::new(CachingClient::new(
                provider,
                PathBuf::from(&config.cache_dir),
                config.daily_limit,
            )),
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                warn!(error = %e, "could not build OpenAI provider; analysis disabled");
                Arc::new(DisabledClient)
            }
        },
        other => {
            warn!(provider = other, "unsupported analysis provider; analysis disabled");
            Arc::new(DisabledClient)
        }
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: does a *real* remote call. Separated so the same
/// caching wrapper serves production and tests.
pub trait Provider: Send + Sync + 'static {
    fn fetch<'a>(&'a self, prompt: &'a Prompt) -> ServiceFuture<'a>;
    fn name(&self) -> &'static str;
}

/// OpenAI provider (Chat Completions API).
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(config: &AiConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .user_agent("chat-compliance-analyzer/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_output_tokens,
        })
    }
}

impl Provider for OpenAiProvider {
    fn fetch<'a>(&'a self, prompt: &'a Prompt) -> ServiceFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(ServiceError::Unavailable("missing API key".to_string()));
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                #[serde(default)]
                content: Option<String>,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: &prompt.system,
                    },
                    Msg {
                        role: "user",
                        content: &prompt.user,
                    },
                ],
                temperature: 0.0,
                max_tokens: self.max_tokens,
            };

            let resp = self
                .http
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
                .map_err(|e| ServiceError::Unavailable(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(ServiceError::Status(resp.status().as_u16()));
            }
            let body: Resp = resp
                .json()
                .await
                .map_err(|e| ServiceError::Unavailable(format!("undecodable envelope: {e}")))?;
            let content = body
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            if content.trim().is_empty() {
                Err(ServiceError::EmptyReply)
            } else {
                Ok(content)
            }
        })
    }
    fn name(&self) -> &'static str {
        "openai"
    }
}

impl AnalysisClient for OpenAiProvider {
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> ServiceFuture<'a> {
        self.fetch(prompt)
    }
    fn provider_name(&self) -> &'static str {
        self.name()
    }
}

/// Always fails with `ServiceError::Disabled`; used when analysis is off.
pub struct DisabledClient;

impl AnalysisClient for DisabledClient {
    fn complete<'a>(&'a self, _prompt: &'a Prompt) -> ServiceFuture<'a> {
        Box::pin(async { Err(ServiceError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Scripted provider for tests/local runs: pops queued replies in order, then
/// keeps answering with the fallback.
pub struct MockProvider {
    script: Mutex<VecDeque<Result<String, ServiceError>>>,
    fallback: Result<String, ServiceError>,
    calls: AtomicUsize,
}

impl MockProvider {
    /// Valid reply with no violations in any section.
    pub const EMPTY_REPORT: &'static str = r#"{"grammarBreakdown":{"spelling":{"count":0,"examples":[]},"grammar":{"count":0,"examples":[]},"punctuation":{"count":0,"examples":[]}},"general":{"items":[]},"psychology":{"items":[]},"captions":{"items":[]},"sales":{"items":[]}}"#;

    pub fn fixed(reply: impl Into<String>) -> Self {
        Self::scripted(Vec::new(), Ok(reply.into()))
    }

    pub fn scripted(
        replies: Vec<Result<String, ServiceError>>,
        fallback: Result<String, ServiceError>,
    ) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

impl Provider for MockProvider {
    fn fetch<'a>(&'a self, _prompt: &'a Prompt) -> ServiceFuture<'a> {
        let out = self.next_reply();
        Box::pin(async move { out })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

impl AnalysisClient for MockProvider {
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> ServiceFuture<'a> {
        self.fetch(prompt)
    }
    fn provider_name(&self) -> &'static str {
        self.name()
    }
}

// ------------------------------------------------------------
// Caching client wrapper (file cache + daily limit)
// ------------------------------------------------------------

/// Counter state is guarded by a `Mutex`; only replies that contain a JSON
/// object are cached, so a garbled reply is retried on the next run.
pub struct CachingClient<P: Provider> {
    inner: P,
    cache_dir: PathBuf,
    daily_limit_max: u32,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: Provider> CachingClient<P> {
    pub fn new(inner: P, cache_dir: PathBuf, daily_limit_max: u32) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!(error = %e, dir = %cache_dir.display(), "cannot create analysis cache dir");
        }
        let counter = Arc::new(Mutex::new(
            load_daily_counter(&cache_dir).unwrap_or_default(),
        ));
        Self {
            inner,
            cache_dir,
            daily_limit_max,
            counter,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    async fn complete_impl(&self, prompt: &Prompt) -> Result<String, ServiceError> {
        // 1) Cache lookup (hits never count against the limit).
        let key = cache_key(self.inner.name(), prompt);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            debug!(target: "analysis", %key, "analysis cache hit");
            return Ok(hit.reply);
        }

        // 2) Daily limit for real calls.
        {
            let mut g = self.counter.lock().unwrap_or_else(|e| e.into_inner());
            if g.is_expired() {
                g.reset_to_today();
                let _ = save_daily_counter(&self.cache_dir, &g);
            }
            if g.count >= self.daily_limit_max {
                return Err(ServiceError::DailyLimit(self.daily_limit_max));
            }
        }

        // 3) Real call.
        let reply = self.inner.fetch(prompt).await?;

        {
            let mut g = self.counter.lock().unwrap_or_else(|e| e.into_inner());
            g.count = g.count.saturating_add(1);
            let _ = save_daily_counter(&self.cache_dir, &g);
        }
        if extract_balanced_object(&reply).is_some() {
            let entry = CacheEntry {
                reply: reply.clone(),
            };
            if let Err(e) = write_cache_file(&self.cache_dir, &key, &entry) {
                warn!(error = %e, "analysis cache write failed");
            }
        }
        Ok(reply)
    }
}

impl<P: Provider> AnalysisClient for CachingClient<P> {
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> ServiceFuture<'a> {
        Box::pin(self.complete_impl(prompt))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// File cache helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    reply: String,
}

/// Stable across processes and platforms (unlike `DefaultHasher`).
fn cache_key(provider: &str, prompt: &Prompt) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.system.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.user.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<CacheEntry> {
    let s = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&s).ok()
}

fn write_cache_file(dir: &Path, key: &str, value: &CacheEntry) -> io::Result<()> {
    let path = cache_path(dir, key);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    fs::rename(tmp, path)?;
    Ok(())
}

// ------------------------------------------------------------
// Daily counter helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}
impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}
impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        info!(previous = self.count, "daily analysis counter reset");
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    chrono::Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let p = counter_path(dir);
    let tmp = p.with_extension("json.tmp");
    let s = serde_json::to_string(dc).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(s.as_bytes())?;
    fs::rename(tmp, p)?;
    Ok(())
}
