//! AI adapter: provider abstraction, Gemini provider, file cache and daily limit.

use std::collections::BTreeSet;
use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::fallback::{is_short, keyword_sentiment, local_analysis, parse_hashtags, truncate_chars, word_count};
use super::{clamp_engagement, Analysis, ContentType, DynSummarizer, LocalSummarizer, Sentiment, Summarizer};
use crate::config::ai::AiConfig;
use crate::error::AnalysisError;
use crate::ingest::types::RawPost;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Factory: build a summarizer according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a deterministic mock provider behind the cache.
/// * Else if AI is disabled or the provider is `local`, analysis happens locally.
/// * Else builds the Gemini provider wrapped with caching + daily limit.
pub fn build_summarizer(config: &AiConfig) -> DynSummarizer {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(CachingClient::new(
            MockProvider::default(),
            config.cache_dir.clone(),
            config.daily_limit,
        ));
    }

    if !config.enabled {
        return Arc::new(LocalSummarizer);
    }

    match config.provider.as_str() {
        "gemini" => {
            let provider = GeminiProvider::new(config.api_key.clone(), config.model.as_deref());
            Arc::new(CachingClient::new(
                provider,
                config.cache_dir.clone(),
                config.daily_limit,
            ))
        }
        _ => Arc::new(LocalSummarizer),
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: does the *real* remote call. Separated so the same
/// caching wrapper serves production and tests.
pub trait Provider: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        post: &'a RawPost,
    ) -> Pin<Box<dyn Future<Output = Result<Analysis, AnalysisError>> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

/// Google Gemini `generateContent` provider.
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("social-digest/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_key,
            model: model_override.unwrap_or(GEMINI_DEFAULT_MODEL).to_string(),
        }
    }
}

impl Provider for GeminiProvider {
    fn fetch<'a>(
        &'a self,
        post: &'a RawPost,
    ) -> Pin<Box<dyn Future<Output = Result<Analysis, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Part<'a> {
                text: &'a str,
            }
            #[derive(Serialize)]
            struct Content<'a> {
                parts: Vec<Part<'a>>,
            }
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct GenerationConfig {
                temperature: f32,
                response_mime_type: &'static str,
            }
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct Req<'a> {
                contents: Vec<Content<'a>>,
                generation_config: GenerationConfig,
            }
            #[derive(Deserialize)]
            struct Resp {
                #[serde(default)]
                candidates: Vec<Candidate>,
            }
            #[derive(Deserialize)]
            struct Candidate {
                content: Option<CandidateContent>,
            }
            #[derive(Deserialize)]
            struct CandidateContent {
                #[serde(default)]
                parts: Vec<CandidatePart>,
            }
            #[derive(Deserialize)]
            struct CandidatePart {
                text: Option<String>,
            }

            if self.api_key.is_empty() {
                return Err(AnalysisError::Request("missing Gemini API key".into()));
            }

            let prompt = build_prompt(post);
            let req = Req {
                contents: vec![Content {
                    parts: vec![Part { text: &prompt }],
                }],
                generation_config: GenerationConfig {
                    temperature: 0.2,
                    response_mime_type: "application/json",
                },
            };

            let url = format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model);
            let resp = self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&req)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(AnalysisError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }

            let body: Resp = resp
                .json()
                .await
                .map_err(|e| AnalysisError::Malformed(e.to_string()))?;
            let text: String = body
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
                .unwrap_or_default();

            parse_analysis_response(&text, post)
        })
    }
    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Deterministic provider for tests/local runs: local analysis tagged as AI output.
#[derive(Clone, Default)]
pub struct MockProvider;

impl Provider for MockProvider {
    fn fetch<'a>(
        &'a self,
        post: &'a RawPost,
    ) -> Pin<Box<dyn Future<Output = Result<Analysis, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            let mut a = local_analysis(post);
            a.summary = format!("(mock) {}", a.summary);
            Ok(a)
        })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Prompt + response parsing
// ------------------------------------------------------------

pub fn build_prompt(post: &RawPost) -> String {
    let words = word_count(&post.body);
    let summary_words = match words {
        0..=19 => 30,
        20..=49 => 50,
        _ => 100,
    };
    format!(
        "Analyze this {platform} post from @{handle}.\n\
         Respond with ONE JSON object and nothing else, with these keys:\n\
         \"summary\": a summary in at most {summary_words} words,\n\
         \"topic\": the main topic in at most 15 words,\n\
         \"sentiment\": one of \"Positive\", \"Negative\", \"Neutral\",\n\
         \"content_type\": one of Personal, News, Promotional, Educational, Entertainment, Opinion, Question, Announcement,\n\
         \"engagement_potential\": an integer 1-10,\n\
         \"key_themes\": 3-5 short themes,\n\
         \"hashtags\": hashtags worth following, without '#'.\n\n\
         POST CONTENT:\n{body}",
        platform = post.platform,
        handle = post.handle,
        body = post.body,
    )
}

#[derive(Debug, Deserialize)]
struct WireAnalysis {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    engagement_potential: Option<serde_json::Value>,
    #[serde(default, alias = "topics")]
    key_themes: Option<Vec<String>>,
    #[serde(default)]
    hashtags: Option<Vec<String>>,
}

/// Turn the model's text into an `Analysis`.
/// Tolerates markdown code fences and prose around the JSON object.
pub fn parse_analysis_response(text: &str, post: &RawPost) -> Result<Analysis, AnalysisError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::Empty);
    }
    let (start, end) = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => return Err(AnalysisError::Malformed("no JSON object in response".into())),
    };
    let wire: WireAnalysis = serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

    let summary = wire.summary.map(|s| s.trim().to_string()).unwrap_or_default();
    let topic = wire.topic.map(|s| s.trim().to_string()).unwrap_or_default();
    if summary.is_empty() && topic.is_empty() {
        return Err(AnalysisError::Malformed("neither summary nor topic present".into()));
    }

    let sentiment = wire
        .sentiment
        .as_deref()
        .and_then(|s| s.parse::<Sentiment>().ok())
        .unwrap_or_else(|| keyword_sentiment(&post.body));

    let engagement = match wire.engagement_potential {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(serde_json::Value::String(s)) => s
            .split(|c: char| !c.is_ascii_digit())
            .find(|t| !t.is_empty())
            .and_then(|t| t.parse().ok())
            .unwrap_or(0),
        _ => 0,
    };

    let topics: BTreeSet<String> = wire
        .key_themes
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let mut hashtags = parse_hashtags(&post.body);
    hashtags.extend(
        wire.hashtags
            .unwrap_or_default()
            .into_iter()
            .map(|h| h.trim().trim_start_matches('#').to_lowercase())
            .filter(|h| !h.is_empty()),
    );

    Ok(Analysis {
        summary: if summary.is_empty() {
            truncate_chars(&post.body, 100)
        } else {
            summary
        },
        topic: if topic.is_empty() {
            "Social media post".to_string()
        } else {
            topic
        },
        sentiment,
        topics,
        content_type: wire
            .content_type
            .as_deref()
            .map(ContentType::parse_lenient)
            .unwrap_or_default(),
        engagement_potential: clamp_engagement(engagement),
        hashtags,
    })
}

// ------------------------------------------------------------
// Caching client wrapper (file cache + daily limit)
// ------------------------------------------------------------

/// Counter state is guarded by a `Mutex`; cache files are written atomically.
pub struct CachingClient<P: Provider> {
    inner: P,
    cache_dir: PathBuf,
    daily_limit_max: u32,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: Provider> CachingClient<P> {
    pub fn new(inner: P, cache_dir: PathBuf, daily_limit_max: u32) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            tracing::warn!(error = %e, dir = %cache_dir.display(), "AI cache dir unavailable");
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

    async fn summarize_impl(&self, post: &RawPost) -> Result<Analysis, AnalysisError> {
        // 1) Short posts never reach the provider.
        if is_short(post) {
            tracing::debug!(post_id = %post.id, "short post, analyzed locally");
            return Ok(local_analysis(post));
        }

        // 2) Cache lookup (hits do not count against the limit).
        let key = cache_key(post);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            return Ok(hit);
        }

        // 3) Daily limit: the slot is taken before the call and handed back
        //    if the call fails.
        self.reserve_call()?;

        // 4) Real call.
        let fresh = match self.inner.fetch(post).await {
            Ok(a) => a,
            Err(e) => {
                self.release_call();
                return Err(e);
            }
        };
        if let Err(e) = write_cache_file(&self.cache_dir, &key, &fresh) {
            tracing::warn!(error = %e, post_id = %post.id, "AI cache write failed");
        }
        Ok(fresh)
    }

    fn reserve_call(&self) -> Result<(), AnalysisError> {
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        if g.is_expired() {
            g.reset_to_today();
        }
        if g.count >= self.daily_limit_max {
            return Err(AnalysisError::DailyLimit(self.daily_limit_max));
        }
        g.count = g.count.saturating_add(1);
        let _ = save_daily_counter(&self.cache_dir, &g);
        Ok(())
    }

    fn release_call(&self) {
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        g.count = g.count.saturating_sub(1);
        let _ = save_daily_counter(&self.cache_dir, &g);
    }

    /// Real calls made today.
    pub fn calls_today(&self) -> u32 {
        let g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        if g.is_expired() {
            0
        } else {
            g.count
        }
    }
}

impl<P: Provider> Summarizer for CachingClient<P> {
    fn summarize<'a>(
        &'a self,
        post: &'a RawPost,
    ) -> Pin<Box<dyn Future<Output = Result<Analysis, AnalysisError>> + Send + 'a>> {
        Box::pin(self.summarize_impl(post))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// File cache helpers
// ------------------------------------------------------------

fn cache_key(post: &RawPost) -> String {
    let mut hasher = Sha256::new();
    hasher.update(post.platform.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(post.id.as_bytes());
    hasher.update([0u8]);
    hasher.update(post.body.as_bytes());
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

fn read_cache_file(dir: &Path, key: &str) -> Option<Analysis> {
    let buf = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&buf).ok()
}

fn write_cache_file(dir: &Path, key: &str, value: &Analysis) -> io::Result<()> {
    let path = cache_path(dir, key);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(value).map_err(io::Error::other)?;
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
    let s = serde_json::to_string(dc).map_err(io::Error::other)?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(s.as_bytes())?;
    fs::rename(tmp, p)?;
    Ok(())
}
