//! social-digest binary entrypoint.
//! Loads config, builds the tracker, starts the poll scheduler and serves the API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;

use social_digest::analyze::ai_adapter::build_summarizer;
use social_digest::config::{ai::AiConfig, TrackerConfig};
use social_digest::ingest::config::load_seed_sources;
use social_digest::ingest::providers::FetcherSet;
use social_digest::ingest::scheduler::spawn_scheduler;
use social_digest::metrics::Metrics;
use social_digest::{create_router, init_tracing, Store, Tracker};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = TrackerConfig::load_default()?;
    let ai = AiConfig::load_default()?;
    tracing::info!(
        interval_secs = config.interval_secs,
        data_dir = %config.data_dir.display(),
        ai_enabled = ai.enabled,
        provider = %ai.provider,
        "config loaded"
    );

    let store = Store::open(config.data_dir.clone())
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;
    let seeds = load_seed_sources(&config.sources_seed_path)?;
    let interval = Duration::from_secs(config.interval_secs);

    // Recorder first, so series descriptions registered by the tracker land in it.
    let metrics = Metrics::init(interval.as_secs())
        .map_err(|e| tracing::warn!(error = %e, "metrics disabled"))
        .ok();

    let tracker = Arc::new(Tracker::new(
        store,
        FetcherSet::from_env(),
        build_summarizer(&ai),
        config,
    ));
    tracker
        .seed_sources_if_empty(seeds)
        .context("seeding tracked sources")?;

    spawn_scheduler(tracker.clone(), interval);

    let mut router = create_router(tracker);
    if let Some(metrics) = metrics {
        router = router.merge(metrics.router());
    }

    Ok(router.into())
}
