// src/error.rs
//! Error taxonomy. Every variant is scoped to one source or one post; none of
//! them is meant to take the process down.

use std::time::Duration;

use thiserror::Error;

use crate::ingest::types::{Platform, TrackedSource};

/// Fetching a source's recent posts failed. Fatal for that source's cycle only.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("platform API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("scraper run failed with status: {0}")]
    RunFailed(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("fetcher for {0} is not configured")]
    NotConfigured(&'static str),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// Summarizing one post failed. Fatal for that post only.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("AI request failed: {0}")]
    Request(String),

    #[error("AI API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed AI response: {0}")]
    Malformed(String),

    #[error("AI returned an empty response")]
    Empty,

    #[error("daily AI call limit of {0} reached")]
    DailyLimit(u32),

    #[error("summarization timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        AnalysisError::Request(err.to_string())
    }
}

/// A record for this post id already exists for the source.
/// Expected outcome of deduplication, never surfaced to operators.
#[derive(Debug, Error)]
#[error("post {post_id} already processed for {tracked}")]
pub struct ConflictError {
    pub tracked: TrackedSource,
    pub post_id: String,
}

/// Bad input to a management operation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {platform} handle '{handle}': {reason}")]
    InvalidHandle {
        platform: Platform,
        handle: String,
        reason: &'static str,
    },

    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),

    #[error("source {0} is not tracked")]
    UnknownSource(TrackedSource),

    #[error("config load failed: {0}")]
    Load(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serde: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Conflict(#[from] ConflictError),
}

/// Error type of the orchestrator and the management operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("a cycle for {0} is already running")]
    AlreadyRunning(TrackedSource),

    #[error("fetch failed for {tracked}: {error}")]
    Fetch {
        tracked: TrackedSource,
        #[source]
        error: FetchError,
    },

    #[error("post {post_id} has no record for {tracked}")]
    RecordNotFound {
        tracked: TrackedSource,
        post_id: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
