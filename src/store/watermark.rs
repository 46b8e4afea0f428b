// src/store/watermark.rs
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::TrackedSource;

/// Per-source novelty state.
///
/// `seen_ids` is authoritative for duplicate prevention; `last_seen_time` only
/// bounds how far back novelty checks look. Ids are kept oldest-first so
/// trimming drops the least recent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceWatermark {
    pub source: TrackedSource,
    #[serde(default)]
    pub last_seen_id: Option<String>,
    #[serde(default)]
    pub last_seen_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seen_ids: VecDeque<String>,
}

impl SourceWatermark {
    pub fn new(source: TrackedSource) -> Self {
        Self {
            source,
            last_seen_id: None,
            last_seen_time: None,
            seen_ids: VecDeque::new(),
        }
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.seen_ids.iter().any(|s| s == id)
    }

    pub fn record_seen(&mut self, id: &str) {
        if !self.has_seen(id) {
            self.seen_ids.push_back(id.to_string());
        }
    }

    /// Move the watermark forward to `at`. Never moves it backwards.
    /// Returns whether it moved.
    pub fn advance(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        match self.last_seen_time {
            Some(current) if at <= current => false,
            _ => {
                self.last_seen_time = Some(at);
                self.last_seen_id = Some(id.to_string());
                true
            }
        }
    }

    /// Keep only the `cap` most recently recorded ids.
    pub fn trim(&mut self, cap: usize) {
        while self.seen_ids.len() > cap {
            self.seen_ids.pop_front();
        }
    }
}
