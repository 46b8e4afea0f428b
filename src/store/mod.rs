// src/store/mod.rs
//! JSON-file store for tracked sources, watermarks and processed records.
//!
//! Layout under the data dir:
//! - `sources.json`
//! - `watermarks.json`
//! - `records/{platform}/{handle}/{safe_id}.json`, one record per file
//!
//! Every write goes through a `.tmp` file and a rename.

pub mod watermark;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::analyze::Analysis;
use crate::error::{ConflictError, StoreError};
use crate::ingest::types::{Platform, RawPost, TrackedSource};

pub use watermark::SourceWatermark;

/// Durable unit of work product. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub raw_post: RawPost,
    pub analysis: Analysis,
    pub processed_at: DateTime<Utc>,
    /// Summarizer that produced `analysis`.
    pub provider: String,
}

impl ProcessedRecord {
    pub fn source(&self) -> TrackedSource {
        TrackedSource {
            platform: self.raw_post.platform,
            handle: self.raw_post.handle.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    sources: BTreeSet<TrackedSource>,
    watermarks: BTreeMap<TrackedSource, SourceWatermark>,
}

pub struct Store {
    root: PathBuf,
    state: Mutex<StoreState>,
}

impl Store {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("records"))?;

        let sources: Vec<TrackedSource> =
            read_json_or_default(&root.join("sources.json"))?;
        let watermarks: Vec<SourceWatermark> =
            read_json_or_default(&root.join("watermarks.json"))?;

        let state = StoreState {
            sources: sources.into_iter().collect(),
            watermarks: watermarks
                .into_iter()
                .map(|w| (w.source.clone(), w))
                .collect(),
        };
        tracing::debug!(
            root = %root.display(),
            sources = state.sources.len(),
            watermarks = state.watermarks.len(),
            "store opened"
        );
        Ok(Self {
            root,
            state: Mutex::new(state),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ---- sources ----

    pub fn sources(&self, platform: Option<Platform>) -> Vec<TrackedSource> {
        self.lock()
            .sources
            .iter()
            .filter(|s| platform.map_or(true, |p| s.platform == p))
            .cloned()
            .collect()
    }

    pub fn contains_source(&self, source: &TrackedSource) -> bool {
        self.lock().sources.contains(source)
    }

    /// Returns `false` when the source was already tracked.
    pub fn add_source(&self, source: TrackedSource) -> Result<bool, StoreError> {
        let mut st = self.lock();
        if !st.sources.insert(source) {
            return Ok(false);
        }
        self.persist_sources(&st)?;
        Ok(true)
    }

    /// Stops tracking; watermark and records are kept so re-adding does not
    /// reprocess old posts. Returns `false` when the source was not tracked.
    pub fn remove_source(&self, source: &TrackedSource) -> Result<bool, StoreError> {
        let mut st = self.lock();
        if !st.sources.remove(source) {
            return Ok(false);
        }
        self.persist_sources(&st)?;
        Ok(true)
    }

    /// Replace the tracked list of one platform.
    pub fn replace_sources(
        &self,
        platform: Platform,
        sources: Vec<TrackedSource>,
    ) -> Result<(), StoreError> {
        let mut st = self.lock();
        st.sources.retain(|s| s.platform != platform);
        st.sources
            .extend(sources.into_iter().filter(|s| s.platform == platform));
        self.persist_sources(&st)
    }

    fn persist_sources(&self, st: &StoreState) -> Result<(), StoreError> {
        let list: Vec<&TrackedSource> = st.sources.iter().collect();
        write_json_atomic(&self.root.join("sources.json"), &list)
    }

    // ---- watermarks ----

    /// Current watermark; an empty one when the source has never been processed.
    pub fn watermark(&self, source: &TrackedSource) -> SourceWatermark {
        self.lock()
            .watermarks
            .get(source)
            .cloned()
            .unwrap_or_else(|| SourceWatermark::new(source.clone()))
    }

    pub fn save_watermark(&self, wm: &SourceWatermark) -> Result<(), StoreError> {
        let mut st = self.lock();
        st.watermarks.insert(wm.source.clone(), wm.clone());
        let list: Vec<&SourceWatermark> = st.watermarks.values().collect();
        write_json_atomic(&self.root.join("watermarks.json"), &list)
    }

    // ---- records ----

    fn record_dir(&self, platform: Platform, handle: &str) -> PathBuf {
        self.root
            .join("records")
            .join(platform.as_str())
            .join(handle)
    }

    /// Store a record. A record already present for the same source and post
    /// id is a `Conflict`; the stored one is left untouched.
    pub fn insert_record(&self, record: &ProcessedRecord) -> Result<(), StoreError> {
        let post = &record.raw_post;
        let dir = self.record_dir(post.platform, &post.handle);
        let path = dir.join(format!("{}.json", safe_file_stem(&post.id)));
        if path.exists() {
            return Err(ConflictError {
                tracked: record.source(),
                post_id: post.id.clone(),
            }
            .into());
        }
        fs::create_dir_all(&dir)?;
        write_json_atomic(&path, record)
    }

    /// One stored record, `None` when the post was never processed.
    pub fn get_record(
        &self,
        source: &TrackedSource,
        post_id: &str,
    ) -> Result<Option<ProcessedRecord>, StoreError> {
        let path = self
            .record_dir(source.platform, &source.handle)
            .join(format!("{}.json", safe_file_stem(post_id)));
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// All records of one source, oldest `published_at` first.
    pub fn records_for(&self, source: &TrackedSource) -> Result<Vec<ProcessedRecord>, StoreError> {
        let mut out = read_record_dir(&self.record_dir(source.platform, &source.handle))?;
        out.sort_by(|a, b| {
            a.raw_post
                .published_at
                .cmp(&b.raw_post.published_at)
                .then_with(|| a.raw_post.id.cmp(&b.raw_post.id))
        });
        Ok(out)
    }

    /// Newest `published_at` first, optionally restricted to a platform and to
    /// posts published at or after `since`.
    pub fn list_records(
        &self,
        platform: Option<Platform>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProcessedRecord>, StoreError> {
        let mut out = Vec::new();
        for p in Platform::ALL {
            if platform.is_some_and(|want| want != p) {
                continue;
            }
            let pdir = self.root.join("records").join(p.as_str());
            let entries = match fs::read_dir(&pdir) {
                Ok(e) => e,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    out.extend(read_record_dir(&entry.path())?);
                }
            }
        }
        if let Some(since) = since {
            out.retain(|r| r.raw_post.published_at >= since);
        }
        out.sort_by(|a, b| {
            b.raw_post
                .published_at
                .cmp(&a.raw_post.published_at)
                .then_with(|| a.raw_post.id.cmp(&b.raw_post.id))
        });
        out.truncate(limit);
        Ok(out)
    }

    pub fn record_count(&self, platform: Platform) -> usize {
        let pdir = self.root.join("records").join(platform.as_str());
        let Ok(handles) = fs::read_dir(pdir) else {
            return 0;
        };
        handles
            .flatten()
            .filter_map(|h| fs::read_dir(h.path()).ok())
            .map(|files| {
                files
                    .flatten()
                    .filter(|f| f.path().extension().and_then(|e| e.to_str()) == Some("json"))
                    .count()
            })
            .sum()
    }
}

fn read_record_dir(dir: &Path) -> Result<Vec<ProcessedRecord>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match fs::read_to_string(&path)
            .map_err(StoreError::from)
            .and_then(|s| serde_json::from_str::<ProcessedRecord>(&s).map_err(StoreError::from))
        {
            Ok(rec) => out.push(rec),
            Err(e) => tracing::warn!(error = %e, path = %path.display(), "skipping unreadable record"),
        }
    }
    Ok(out)
}

/// File-name-safe stem for a post id. Ids that need escaping get a short hash
/// suffix so two different ids never share a file.
fn safe_file_stem(id: &str) -> String {
    let clean: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(100)
        .collect();
    if !clean.is_empty() && clean == id {
        return clean;
    }
    let digest = Sha256::digest(id.as_bytes());
    let mut suffix = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut suffix, "{:02x}", b);
    }
    if clean.is_empty() {
        suffix
    } else {
        format!("{clean}-{suffix}")
    }
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(serde_json::from_str(&s)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
