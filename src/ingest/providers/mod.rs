// src/ingest/providers/mod.rs
pub mod apify;
pub mod instagram;
pub mod twitter;
pub mod youtube_feed;

use std::collections::HashMap;
use std::sync::Arc;

use crate::ingest::types::{Platform, PostFetcher};

pub use apify::ApifyClient;
pub use instagram::InstagramFetcher;
pub use twitter::TweetFetcher;
pub use youtube_feed::YoutubeFeedFetcher;

/// Platform → fetcher routing used by the poll cycle.
#[derive(Clone, Default)]
pub struct FetcherSet {
    by_platform: HashMap<Platform, Arc<dyn PostFetcher>>,
}

impl FetcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: Platform, fetcher: Arc<dyn PostFetcher>) -> Self {
        self.by_platform.insert(platform, fetcher);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PostFetcher>> {
        self.by_platform.get(&platform).cloned()
    }

    /// Production fetchers. Without `APIFY_TOKEN` the photo and micro-blog
    /// fetchers are still registered but fail with `NotConfigured`.
    pub fn from_env() -> Self {
        let apify = ApifyClient::from_env().map(Arc::new);
        if apify.is_none() {
            tracing::warn!("APIFY_TOKEN not set; photo and microblog sources will fail to fetch");
        }
        Self::new()
            .with(Platform::Video, Arc::new(YoutubeFeedFetcher::http()))
            .with(Platform::Photo, Arc::new(InstagramFetcher::new(apify.clone())))
            .with(Platform::Microblog, Arc::new(TweetFetcher::new(apify)))
    }
}
