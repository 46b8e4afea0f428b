// src/ingest/locks.rs
//! Per-source single-flight: at most one cycle per `(platform, handle)`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::ingest::types::TrackedSource;

#[derive(Debug, Default, Clone)]
pub struct SourceLocks {
    inflight: Arc<Mutex<HashSet<TrackedSource>>>,
}

/// Held for the duration of one cycle; releases the source on drop.
#[derive(Debug)]
pub struct SourceGuard {
    inflight: Arc<Mutex<HashSet<TrackedSource>>>,
    source: TrackedSource,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking. `None` when a cycle for `source` is already in flight.
    pub fn try_acquire(&self, source: &TrackedSource) -> Option<SourceGuard> {
        let mut set = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(source.clone()) {
            return None;
        }
        Some(SourceGuard {
            inflight: Arc::clone(&self.inflight),
            source: source.clone(),
        })
    }

    pub fn is_busy(&self, source: &TrackedSource) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(source)
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.inflight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.source);
    }
}
