//! history.rs: bounded in-memory log of finished poll cycles for the status page.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::ingest::cycle::CycleResult;

#[derive(Debug)]
pub struct CycleHistory {
    inner: Mutex<VecDeque<CycleResult>>,
    cap: usize,
}

impl CycleHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, result: CycleResult) {
        let mut v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.push_back(result);
        while v.len() > self.cap {
            v.pop_front();
        }
    }

    /// Up to `n` most recent results, newest first.
    pub fn last_n(&self, n: usize) -> Vec<CycleResult> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
