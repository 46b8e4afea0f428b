use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::ingest::normalize_text;
use crate::ingest::providers::apify::{ApifyClient, TWEET_SCRAPER};
use crate::ingest::types::{MediaKind, MediaRef, Platform, PostFetcher, RawPost, TrackedSource};

#[derive(Debug, Clone, Serialize)]
struct ScraperInput {
    #[serde(rename = "twitterHandles")]
    twitter_handles: Vec<String>,
    #[serde(rename = "maxItems")]
    max_items: u32,
    sort: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tweet {
    pub id: Option<String>,
    pub text: Option<String>,
    #[serde(alias = "fullText")]
    pub full_text: Option<String>,
    pub url: Option<String>,
    #[serde(alias = "createdAt")]
    pub created_at: Option<String>,
    #[serde(rename = "extendedEntities")]
    pub extended_entities: Option<ExtendedEntities>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtendedEntities {
    #[serde(default)]
    pub media: Vec<TweetMedia>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TweetMedia {
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub media_url_https: Option<String>,
}

impl Tweet {
    /// Whichever text field is populated, preferring `full_text`.
    pub fn content(&self) -> Option<&str> {
        self.full_text.as_deref().or(self.text.as_deref())
    }

    fn into_raw(self, handle: &str, fetched_at: DateTime<Utc>) -> Option<RawPost> {
        let id = self.id.as_deref().map(str::trim).filter(|s| !s.is_empty())?.to_string();
        let body = normalize_text(self.content().unwrap_or_default());
        let published_at = self
            .created_at
            .as_deref()
            .and_then(parse_created_at)
            .unwrap_or(fetched_at);

        let media = self
            .extended_entities
            .map(|e| e.media)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                let url = m.media_url_https?;
                let kind = match m.media_type.as_deref() {
                    Some("video") | Some("animated_gif") => MediaKind::Video,
                    _ => MediaKind::Image,
                };
                Some(MediaRef { kind, url })
            })
            .collect();

        Some(RawPost {
            url: self
                .url
                .or_else(|| Some(format!("https://x.com/{handle}/status/{id}"))),
            id,
            platform: Platform::Microblog,
            handle: handle.to_string(),
            published_at,
            body,
            media,
        })
    }
}

/// `Wed Oct 10 20:19:24 +0000 2018` or RFC 3339.
fn parse_created_at(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Recent tweets of a handle via the Apify tweet scraper.
pub struct TweetFetcher {
    client: Option<Arc<ApifyClient>>,
}

impl TweetFetcher {
    pub fn new(client: Option<Arc<ApifyClient>>) -> Self {
        Self { client }
    }

    pub(crate) fn convert(items: Vec<Tweet>, source: &TrackedSource, limit: u32) -> Vec<RawPost> {
        let fetched_at = Utc::now();
        items
            .into_iter()
            .filter_map(|t| t.into_raw(&source.handle, fetched_at))
            .take(limit as usize)
            .collect()
    }
}

#[async_trait]
impl PostFetcher for TweetFetcher {
    async fn fetch_recent_posts(
        &self,
        source: &TrackedSource,
        limit: u32,
    ) -> Result<Vec<RawPost>, FetchError> {
        let client = self
            .client
            .as_ref()
            .ok_or(FetchError::NotConfigured("microblog"))?;
        let input = ScraperInput {
            twitter_handles: vec![source.handle.clone()],
            max_items: limit,
            sort: "Latest",
        };
        let items: Vec<Tweet> = client.run_actor(TWEET_SCRAPER, &input).await?;
        Ok(Self::convert(items, source, limit))
    }

    fn name(&self) -> &'static str {
        "apify_tweets"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_timestamp_shapes_parse() {
        let a = parse_created_at("Wed Oct 10 20:19:24 +0000 2018").unwrap();
        assert_eq!(a.to_rfc3339(), "2018-10-10T20:19:24+00:00");
        let b = parse_created_at("2018-10-10T22:19:24+02:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_created_at("yesterday").is_none());
    }

    #[test]
    fn tweets_convert_with_media() {
        let json = r#"[
          {"id": "1001", "text": "short", "fullText": "Rust 1.90 is out! #rustlang",
           "createdAt": "Thu Sep 18 14:00:00 +0000 2025",
           "extendedEntities": {"media": [{"type": "photo", "media_url_https": "https://pbs/1.jpg"},
                                          {"type": "video", "media_url_https": "https://pbs/2.jpg"}]}},
          {"text": "no id"}
        ]"#;
        let items: Vec<Tweet> = serde_json::from_str(json).unwrap();
        let src = TrackedSource::new(Platform::Microblog, "rustlang").unwrap();
        let posts = TweetFetcher::convert(items, &src, 20);
        assert_eq!(posts.len(), 1);
        let p = &posts[0];
        assert_eq!(p.body, "Rust 1.90 is out! #rustlang");
        assert_eq!(p.url.as_deref(), Some("https://x.com/rustlang/status/1001"));
        assert_eq!(p.media.len(), 2);
        assert_eq!(p.media[1].kind, MediaKind::Video);
    }
}
