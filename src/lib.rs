// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod ingest;
pub mod metrics;
pub mod store;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use api::create_router;
pub use error::{AnalysisError, ConfigError, ConflictError, FetchError, StoreError, TrackerError};
pub use ingest::cycle::{CycleResult, Tracker};
pub use ingest::types::{Platform, PostFetcher, RawPost, TrackedSource};
pub use store::{ProcessedRecord, SourceWatermark, Store};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "social_digest=info,warn";

/// Install the global subscriber: `RUST_LOG` (default `social_digest=info,warn`),
/// compact output, or JSON lines when `LOG_FORMAT=json`.
/// A subscriber installed earlier (e.g. by the hosting runtime) is kept.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
