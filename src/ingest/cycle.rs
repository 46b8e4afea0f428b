// src/ingest/cycle.rs
//! Poll cycle orchestration and the management operations around it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::analyze::DynSummarizer;
use crate::config::TrackerConfig;
use crate::error::{AnalysisError, ConfigError, FetchError, StoreError, TrackerError};
use crate::history::CycleHistory;
use crate::ingest::locks::SourceLocks;
use crate::ingest::providers::FetcherSet;
use crate::ingest::select_new;
use crate::ingest::types::{Platform, RawPost, TrackedSource};
use crate::store::{ProcessedRecord, SourceWatermark, Store};

/// Outcome of one poll cycle for one source.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub source: TrackedSource,
    pub processed: usize,
    pub failed: usize,
    /// Already stored before this cycle (dedup race, not an error).
    pub skipped: usize,
    /// `"{post_id}: {error}"` per failed item.
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingStatus {
    pub interval_secs: u64,
    pub sources: BTreeMap<Platform, Vec<String>>,
    pub running: Vec<TrackedSource>,
    pub last_run: Option<DateTime<Utc>>,
    pub recent_cycles: Vec<CycleResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    pub platform: Platform,
    pub sources: usize,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub summarizer: &'static str,
    pub platforms: Vec<PlatformStats>,
}

/// Recent cycles shown by `tracking_status`.
const STATUS_RECENT_CYCLES: usize = 20;

pub struct Tracker {
    store: Store,
    fetchers: FetcherSet,
    summarizer: DynSummarizer,
    config: TrackerConfig,
    locks: SourceLocks,
    history: CycleHistory,
    started_at: DateTime<Utc>,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl Tracker {
    pub fn new(
        store: Store,
        fetchers: FetcherSet,
        summarizer: DynSummarizer,
        config: TrackerConfig,
    ) -> Self {
        crate::ingest::ensure_metrics_described();
        Self {
            history: CycleHistory::with_capacity(config.history_capacity),
            store,
            fetchers,
            summarizer,
            config,
            locks: SourceLocks::new(),
            started_at: Utc::now(),
            last_run: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_busy(&self, source: &TrackedSource) -> bool {
        self.locks.is_busy(source)
    }

    // ---- cycle ----

    /// One poll cycle: fetch, select new posts, summarize and persist each,
    /// then advance the watermark. Rejected immediately with `AlreadyRunning`
    /// when a cycle for the same source is in flight.
    pub async fn run_cycle(&self, source: &TrackedSource) -> Result<CycleResult, TrackerError> {
        let Some(_guard) = self.locks.try_acquire(source) else {
            counter!("cycle_busy_rejections_total", "platform" => source.platform.as_str())
                .increment(1);
            tracing::info!(target: "cycle", source = %source, "cycle already running, rejected");
            return Err(TrackerError::AlreadyRunning(source.clone()));
        };

        let t0 = Instant::now();
        let started_at = Utc::now();
        counter!("cycle_runs_total", "platform" => source.platform.as_str()).increment(1);

        let outcome = self.run_locked(source, started_at).await;

        histogram!("cycle_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        let finished_at = Utc::now();
        gauge!("tracker_last_run_ts").set(finished_at.timestamp() as f64);
        *self.last_run.lock().unwrap_or_else(|p| p.into_inner()) = Some(finished_at);

        match &outcome {
            Ok(result) => self.history.push(result.clone()),
            Err(e) => self.history.push(CycleResult {
                source: source.clone(),
                processed: 0,
                failed: 0,
                skipped: 0,
                errors: vec![e.to_string()],
                started_at,
                finished_at,
            }),
        }
        outcome
    }

    async fn run_locked(
        &self,
        source: &TrackedSource,
        started_at: DateTime<Utc>,
    ) -> Result<CycleResult, TrackerError> {
        let batch = self.fetch(source).await.map_err(|error| {
            counter!("cycle_fetch_errors_total", "platform" => source.platform.as_str())
                .increment(1);
            tracing::warn!(target: "cycle", source = %source, stage = "fetch", error = %error, "fetch failed");
            TrackerError::Fetch {
                tracked: source.clone(),
                error,
            }
        })?;
        let fetched = batch.len();

        let mut wm = self.store.watermark(source);
        let selected = select_new(
            batch,
            &wm,
            self.config.grace_window(source.platform),
        );
        tracing::debug!(target: "cycle", source = %source, fetched, selected = selected.len(), "batch filtered");

        let mut result = CycleResult {
            source: source.clone(),
            processed: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            started_at,
            finished_at: started_at,
        };
        let mut newest: Option<(String, DateTime<Utc>)> = None;

        for post in selected {
            match self.process_one(&post).await {
                Ok(()) => {
                    result.processed += 1;
                    // selected is ordered by published_at, so the last success is the max
                    newest = Some((post.id.clone(), post.published_at));
                    self.mark_seen(&mut wm, &post.id);
                }
                Err(ItemError::AlreadyStored) => {
                    result.skipped += 1;
                    tracing::debug!(target: "cycle", source = %source, post_id = %post.id, "already stored, skipping");
                    self.mark_seen(&mut wm, &post.id);
                }
                Err(ItemError::Failed { stage, message }) => {
                    result.failed += 1;
                    tracing::warn!(
                        target: "cycle",
                        source = %source,
                        post_id = %post.id,
                        stage,
                        error = %message,
                        "item failed"
                    );
                    result.errors.push(format!("{}: {}", post.id, message));
                }
            }
        }

        if let Some((id, at)) = newest {
            wm.advance(&id, at);
        }
        wm.trim(self.config.seen_capacity);
        self.store.save_watermark(&wm)?;

        counter!("cycle_items_processed_total", "platform" => source.platform.as_str())
            .increment(result.processed as u64);
        counter!("cycle_items_failed_total", "platform" => source.platform.as_str())
            .increment(result.failed as u64);

        result.finished_at = Utc::now();
        tracing::info!(
            target: "cycle",
            source = %source,
            fetched,
            processed = result.processed,
            failed = result.failed,
            skipped = result.skipped,
            "cycle finished"
        );
        Ok(result)
    }

    async fn fetch(&self, source: &TrackedSource) -> Result<Vec<RawPost>, FetchError> {
        let fetcher = self
            .fetchers
            .get(source.platform)
            .ok_or(FetchError::NotConfigured(source.platform.as_str()))?;
        let limit = self.config.fetch_limit.get(source.platform);
        let timeout = self.config.fetch_timeout();
        tokio::time::timeout(timeout, fetcher.fetch_recent_posts(source, limit))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?
    }

    async fn process_one(&self, post: &RawPost) -> Result<(), ItemError> {
        let timeout = self.config.summarize_timeout();
        let analysis = tokio::time::timeout(timeout, self.summarizer.summarize(post))
            .await
            .map_err(|_| AnalysisError::Timeout(timeout))
            .and_then(|r| r)
            .map_err(|e| ItemError::Failed {
                stage: "summarize",
                message: e.to_string(),
            })?;

        let record = ProcessedRecord {
            raw_post: post.clone(),
            analysis,
            processed_at: Utc::now(),
            provider: self.summarizer.provider_name().to_string(),
        };
        match self.store.insert_record(&record) {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict(_)) => Err(ItemError::AlreadyStored),
            Err(e) => Err(ItemError::Failed {
                stage: "persist",
                message: e.to_string(),
            }),
        }
    }

    /// Add to the seen-set and persist right away, so a crash mid-cycle never
    /// reprocesses a stored post.
    fn mark_seen(&self, wm: &mut SourceWatermark, id: &str) {
        wm.record_seen(id);
        if let Err(e) = self.store.save_watermark(wm) {
            tracing::warn!(target: "cycle", source = %wm.source, post_id = id, stage = "persist", error = %e, "saving seen-set failed");
        }
    }

    /// Manual trigger for one tracked source.
    pub async fn trigger_cycle(&self, source: &TrackedSource) -> Result<CycleResult, TrackerError> {
        if !self.store.contains_source(source) {
            return Err(ConfigError::UnknownSource(source.clone()).into());
        }
        self.run_cycle(source).await
    }

    /// Run every tracked source (optionally one platform) concurrently.
    /// Busy sources come back as `AlreadyRunning`.
    pub async fn run_all(
        self: &Arc<Self>,
        platform: Option<Platform>,
    ) -> Vec<(TrackedSource, Result<CycleResult, TrackerError>)> {
        let mut set = JoinSet::new();
        for source in self.store.sources(platform) {
            let this = Arc::clone(self);
            set.spawn(async move {
                let res = this.run_cycle(&source).await;
                (source, res)
            });
        }

        let mut out = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => out.push(pair),
                Err(e) => tracing::error!(target: "cycle", error = %e, "cycle task panicked"),
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    // ---- management ----

    pub fn list_sources(&self, platform: Option<Platform>) -> Vec<TrackedSource> {
        self.store.sources(platform)
    }

    /// Returns the normalized source and whether it was newly added.
    pub fn add_source(
        &self,
        platform: Platform,
        handle: &str,
    ) -> Result<(TrackedSource, bool), TrackerError> {
        let source = TrackedSource::new(platform, handle)?;
        let added = self.store.add_source(source.clone())?;
        if added {
            tracing::info!(source = %source, "source added");
        }
        Ok((source, added))
    }

    /// Stops tracking. Watermark and records are kept.
    pub fn remove_source(&self, platform: Platform, handle: &str) -> Result<TrackedSource, TrackerError> {
        let source = TrackedSource::new(platform, handle)?;
        if !self.store.remove_source(&source)? {
            return Err(ConfigError::UnknownSource(source).into());
        }
        tracing::info!(source = %source, "source removed");
        Ok(source)
    }

    /// Replace a platform's whole list. All handles are validated first;
    /// one bad handle rejects the request and leaves the list unchanged.
    pub fn replace_sources<S: AsRef<str>>(
        &self,
        platform: Platform,
        handles: &[S],
    ) -> Result<Vec<TrackedSource>, TrackerError> {
        let mut sources = handles
            .iter()
            .map(|h| h.as_ref())
            .filter(|h| !h.trim().is_empty())
            .map(|h| TrackedSource::new(platform, h))
            .collect::<Result<Vec<_>, _>>()?;
        sources.sort();
        sources.dedup();
        self.store.replace_sources(platform, sources.clone())?;
        tracing::info!(%platform, count = sources.len(), "sources replaced");
        Ok(sources)
    }

    /// Stored records, newest `published_at` first.
    pub fn list_processed(
        &self,
        platform: Option<Platform>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProcessedRecord>, TrackerError> {
        Ok(self.store.list_records(platform, limit, since)?)
    }

    pub fn get_processed(
        &self,
        platform: Platform,
        handle: &str,
        post_id: &str,
    ) -> Result<ProcessedRecord, TrackerError> {
        let source = TrackedSource::new(platform, handle)?;
        self.store
            .get_record(&source, post_id)?
            .ok_or_else(|| TrackerError::RecordNotFound {
                tracked: source,
                post_id: post_id.to_string(),
            })
    }

    pub fn get_watermark(&self, platform: Platform, handle: &str) -> Result<SourceWatermark, TrackerError> {
        let source = TrackedSource::new(platform, handle)?;
        Ok(self.store.watermark(&source))
    }

    /// Import seed sources when nothing is tracked yet. Returns how many were added.
    pub fn seed_sources_if_empty(&self, seeds: Vec<TrackedSource>) -> Result<usize, TrackerError> {
        if !self.store.sources(None).is_empty() {
            return Ok(0);
        }
        let mut added = 0;
        for s in seeds {
            if self.store.add_source(s)? {
                added += 1;
            }
        }
        if added > 0 {
            tracing::info!(added, "seeded tracked sources");
        }
        Ok(added)
    }

    pub fn tracking_status(&self) -> TrackingStatus {
        let all = self.store.sources(None);
        let mut sources: BTreeMap<Platform, Vec<String>> =
            Platform::ALL.iter().map(|p| (*p, Vec::new())).collect();
        for s in &all {
            sources.entry(s.platform).or_default().push(s.handle.clone());
        }
        TrackingStatus {
            interval_secs: self.config.interval_secs,
            running: all.into_iter().filter(|s| self.locks.is_busy(s)).collect(),
            sources,
            last_run: *self.last_run.lock().unwrap_or_else(|p| p.into_inner()),
            recent_cycles: self.history.last_n(STATUS_RECENT_CYCLES),
        }
    }

    pub fn stats(&self) -> Stats {
        let now = Utc::now();
        Stats {
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            summarizer: self.summarizer.provider_name(),
            platforms: Platform::ALL
                .iter()
                .map(|p| PlatformStats {
                    platform: *p,
                    sources: self.store.sources(Some(*p)).len(),
                    records: self.store.record_count(*p),
                })
                .collect(),
        }
    }
}

enum ItemError {
    AlreadyStored,
    Failed { stage: &'static str, message: String },
}
