// tests/common/mod.rs
//
// Stub collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use social_digest::analyze::fallback::local_analysis;
use social_digest::analyze::{Analysis, Summarizer};
use social_digest::config::TrackerConfig;
use social_digest::ingest::providers::FetcherSet;
use social_digest::{
    AnalysisError, FetchError, Platform, PostFetcher, RawPost, Store, TrackedSource, Tracker,
};

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
}

pub fn post(platform: Platform, handle: &str, id: &str, hour: u32) -> RawPost {
    RawPost {
        id: id.into(),
        platform,
        handle: handle.into(),
        published_at: at(hour),
        body: format!("release notes for {id} with several new features"),
        url: None,
        media: vec![],
    }
}

pub fn tweet(id: &str, hour: u32) -> RawPost {
    post(Platform::Microblog, "rustlang", id, hour)
}

pub fn rustlang() -> TrackedSource {
    TrackedSource::new(Platform::Microblog, "rustlang").unwrap()
}

/// Returns whatever batch was last set, per handle. Optional delay and failure.
#[derive(Default)]
pub struct ScriptedFetcher {
    batches: Mutex<HashMap<String, Vec<RawPost>>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    pub calls: Mutex<usize>,
}

impl ScriptedFetcher {
    pub fn set_batch(&self, handle: &str, posts: Vec<RawPost>) {
        self.batches.lock().unwrap().insert(handle.to_string(), posts);
    }

    pub fn fail_for(&self, handle: &str) {
        self.failing.lock().unwrap().insert(handle.to_string());
    }

    pub fn set_delay(&self, d: Duration) {
        *self.delay.lock().unwrap() = Some(d);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PostFetcher for ScriptedFetcher {
    async fn fetch_recent_posts(
        &self,
        source: &TrackedSource,
        _limit: u32,
    ) -> Result<Vec<RawPost>, FetchError> {
        *self.calls.lock().unwrap() += 1;
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.failing.lock().unwrap().contains(&source.handle) {
            return Err(FetchError::Api {
                status: 503,
                message: "scraper unavailable".into(),
            });
        }
        Ok(self
            .batches
            .lock()
            .unwrap()
            .get(&source.handle)
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Local analysis, but fails or stalls for configured ids. Records every call.
#[derive(Default)]
pub struct FlakySummarizer {
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    pub seen: Mutex<Vec<String>>,
}

impl FlakySummarizer {
    pub fn fail_ids(&self, ids: &[&str]) {
        let mut f = self.failing.lock().unwrap();
        f.clear();
        f.extend(ids.iter().map(|s| s.to_string()));
    }

    /// These ids sleep for an hour before answering.
    pub fn stall_ids(&self, ids: &[&str]) {
        let mut s = self.stalled.lock().unwrap();
        s.clear();
        s.extend(ids.iter().map(|s| s.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) {
        self.seen.lock().unwrap().clear();
    }
}

impl Summarizer for FlakySummarizer {
    fn summarize<'a>(
        &'a self,
        post: &'a RawPost,
    ) -> Pin<Box<dyn Future<Output = Result<Analysis, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            self.seen.lock().unwrap().push(post.id.clone());
            let stalled = self.stalled.lock().unwrap().contains(&post.id);
            if stalled {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.lock().unwrap().contains(&post.id) {
                return Err(AnalysisError::Api {
                    status: 500,
                    message: "model overloaded".into(),
                });
            }
            Ok(local_analysis(post))
        })
    }

    fn provider_name(&self) -> &'static str {
        "flaky"
    }
}

pub struct Harness {
    pub tracker: Arc<Tracker>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub summarizer: Arc<FlakySummarizer>,
}

pub fn harness(dir: &Path) -> Harness {
    harness_with(dir, TrackerConfig::default())
}

/// Every platform routed to one scripted fetcher.
pub fn harness_with(dir: &Path, config: TrackerConfig) -> Harness {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let summarizer = Arc::new(FlakySummarizer::default());
    let mut fetchers = FetcherSet::new();
    for p in Platform::ALL {
        fetchers = fetchers.with(p, fetcher.clone());
    }
    let tracker = Arc::new(Tracker::new(
        Store::open(dir).unwrap(),
        fetchers,
        summarizer.clone(),
        config,
    ));
    Harness {
        tracker,
        fetcher,
        summarizer,
    }
}
