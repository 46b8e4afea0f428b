use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::ingest::normalize_text;
use crate::ingest::providers::apify::{ApifyClient, INSTAGRAM_POST_SCRAPER};
use crate::ingest::types::{MediaKind, MediaRef, Platform, PostFetcher, RawPost, TrackedSource};

#[derive(Debug, Clone, Serialize)]
struct ScraperInput {
    username: Vec<String>,
    #[serde(rename = "resultsLimit")]
    results_limit: u32,
}

/// One item of the post scraper's dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct InstagramPost {
    pub id: Option<String>,
    #[serde(rename = "shortCode")]
    pub short_code: Option<String>,
    pub caption: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "displayUrl")]
    pub display_url: Option<String>,
    #[serde(rename = "videoUrl")]
    pub video_url: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub post_type: Option<String>,
}

impl InstagramPost {
    fn into_raw(self, handle: &str, fetched_at: DateTime<Utc>) -> Option<RawPost> {
        let id = self
            .short_code
            .or(self.id)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())?;

        let published_at = self
            .timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(fetched_at);

        let mut media = Vec::new();
        if let Some(v) = self.video_url.filter(|u| !u.is_empty()) {
            media.push(MediaRef {
                kind: MediaKind::Video,
                url: v,
            });
        }
        let mut image_urls: Vec<String> = self.display_url.into_iter().collect();
        image_urls.extend(self.images);
        for url in image_urls {
            if !url.is_empty() && !media.iter().any(|m| m.url == url) {
                media.push(MediaRef {
                    kind: MediaKind::Image,
                    url,
                });
            }
        }

        Some(RawPost {
            url: self
                .url
                .or_else(|| Some(format!("https://www.instagram.com/p/{id}/"))),
            id,
            platform: Platform::Photo,
            handle: handle.to_string(),
            published_at,
            body: normalize_text(self.caption.as_deref().unwrap_or_default()),
            media,
        })
    }
}

/// Profile posts via the Apify post scraper.
pub struct InstagramFetcher {
    client: Option<Arc<ApifyClient>>,
}

impl InstagramFetcher {
    pub fn new(client: Option<Arc<ApifyClient>>) -> Self {
        Self { client }
    }

    pub(crate) fn convert(items: Vec<InstagramPost>, source: &TrackedSource, limit: u32) -> Vec<RawPost> {
        let fetched_at = Utc::now();
        items
            .into_iter()
            .filter_map(|p| p.into_raw(&source.handle, fetched_at))
            .take(limit as usize)
            .collect()
    }
}

#[async_trait]
impl PostFetcher for InstagramFetcher {
    async fn fetch_recent_posts(
        &self,
        source: &TrackedSource,
        limit: u32,
    ) -> Result<Vec<RawPost>, FetchError> {
        let client = self
            .client
            .as_ref()
            .ok_or(FetchError::NotConfigured("photo"))?;
        let input = ScraperInput {
            username: vec![source.handle.clone()],
            results_limit: limit,
        };
        let items: Vec<InstagramPost> = client.run_actor(INSTAGRAM_POST_SCRAPER, &input).await?;
        Ok(Self::convert(items, source, limit))
    }

    fn name(&self) -> &'static str {
        "apify_instagram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_items_become_raw_posts() {
        let json = r#"[
          {"shortCode": "Cx1", "caption": "Sunset &amp; sea #travel", "url": "https://www.instagram.com/p/Cx1/",
           "displayUrl": "https://cdn/x1.jpg", "images": ["https://cdn/x1.jpg", "https://cdn/x2.jpg"],
           "timestamp": "2025-04-01T08:30:00.000Z", "type": "Sidecar"},
          {"caption": "no id here"},
          {"id": "3141", "videoUrl": "https://cdn/v.mp4", "displayUrl": "https://cdn/v.jpg", "type": "Video"}
        ]"#;
        let items: Vec<InstagramPost> = serde_json::from_str(json).unwrap();
        let src = TrackedSource::new(Platform::Photo, "natgeo").unwrap();
        let posts = InstagramFetcher::convert(items, &src, 12);

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "Cx1");
        assert_eq!(posts[0].body, "Sunset & sea #travel");
        assert_eq!(posts[0].media.len(), 2);
        assert_eq!(posts[0].published_at.to_rfc3339(), "2025-04-01T08:30:00+00:00");

        assert_eq!(posts[1].id, "3141");
        assert_eq!(posts[1].media[0].kind, MediaKind::Video);
        assert_eq!(posts[1].url.as_deref(), Some("https://www.instagram.com/p/3141/"));
    }

    #[tokio::test]
    async fn missing_token_is_not_configured() {
        let f = InstagramFetcher::new(None);
        let src = TrackedSource::new(Platform::Photo, "natgeo").unwrap();
        let err = f.fetch_recent_posts(&src, 5).await.unwrap_err();
        assert!(matches!(err, FetchError::NotConfigured("photo")));
    }
}
