// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::TrackerError;
use crate::ingest::cycle::Tracker;

/// Spawn the background poller: every `interval` run a cycle for each tracked
/// source, sources concurrently. The first tick fires immediately.
pub fn spawn_scheduler(tracker: Arc<Tracker>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tick(&tracker).await;
        }
    })
}

async fn tick(tracker: &Arc<Tracker>) {
    let results = tracker.run_all(None).await;

    let (mut ok, mut busy, mut failed) = (0usize, 0usize, 0usize);
    for (source, res) in &results {
        match res {
            Ok(_) => ok += 1,
            Err(TrackerError::AlreadyRunning(_)) => {
                busy += 1;
                tracing::info!(target: "scheduler", source = %source, "source busy, skipped this tick");
            }
            Err(_) => failed += 1,
        }
    }
    tracing::info!(
        target: "scheduler",
        sources = results.len(),
        ok,
        busy,
        failed,
        "scheduled tick finished"
    );
}
