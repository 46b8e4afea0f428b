use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::error::FetchError;
use crate::ingest::normalize_text;
use crate::ingest::types::{MediaKind, MediaRef, Platform, PostFetcher, RawPost, TrackedSource};

const FEED_URL: &str = "https://www.youtube.com/feeds/videos.xml";

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    #[serde(rename = "videoId", alias = "yt:videoId")]
    video_id: Option<String>,
    title: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    published: Option<String>,
    #[serde(alias = "media:group")]
    group: Option<MediaGroup>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "@href")]
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaGroup {
    #[serde(alias = "media:description")]
    description: Option<String>,
    #[serde(alias = "media:thumbnail")]
    thumbnail: Option<UrlAttr>,
}

#[derive(Debug, Deserialize)]
struct UrlAttr {
    #[serde(rename = "@url")]
    url: Option<String>,
}

/// Channel uploads via the public Atom feed. No API key needed.
pub struct YoutubeFeedFetcher {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { client: reqwest::Client },
}

impl YoutubeFeedFetcher {
    /// Serve the given feed document for every channel.
    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn http() -> Self {
        Self {
            mode: Mode::Http {
                client: reqwest::Client::new(),
            },
        }
    }

    fn parse_feed(xml: &str, source: &TrackedSource, limit: u32) -> Result<Vec<RawPost>, FetchError> {
        let feed: Feed = from_str(xml).map_err(|e| FetchError::Parse(format!("channel feed: {e}")))?;
        let fetched_at = Utc::now();

        let mut out = Vec::new();
        // Feed is newest first.
        for entry in feed.entries.into_iter().take(limit as usize) {
            let Some(id) = entry_id(&entry) else {
                tracing::debug!(source = %source, "feed entry without id, skipping");
                continue;
            };

            let title = entry.title.as_deref().unwrap_or_default();
            let description = entry
                .group
                .as_ref()
                .and_then(|g| g.description.as_deref())
                .unwrap_or_default();
            let body = normalize_text(&format!("{title}\n\n{description}"));

            let published_at = entry
                .published
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or(fetched_at);

            let url = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                .and_then(|l| l.href.clone())
                .or_else(|| Some(format!("https://www.youtube.com/watch?v={id}")));

            let media = entry
                .group
                .and_then(|g| g.thumbnail)
                .and_then(|t| t.url)
                .map(|url| {
                    vec![MediaRef {
                        kind: MediaKind::Thumbnail,
                        url,
                    }]
                })
                .unwrap_or_default();

            out.push(RawPost {
                id,
                platform: Platform::Video,
                handle: source.handle.clone(),
                published_at,
                body,
                url,
                media,
            });
        }
        Ok(out)
    }
}

fn entry_id(entry: &Entry) -> Option<String> {
    entry
        .video_id
        .as_deref()
        .or_else(|| entry.id.as_deref().map(|s| s.trim_start_matches("yt:video:")))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl PostFetcher for YoutubeFeedFetcher {
    async fn fetch_recent_posts(
        &self,
        source: &TrackedSource,
        limit: u32,
    ) -> Result<Vec<RawPost>, FetchError> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_feed(s, source, limit),
            Mode::Http { client } => {
                let resp = client
                    .get(FEED_URL)
                    .query(&[("channel_id", source.handle.as_str())])
                    .send()
                    .await
                    .map_err(|e| {
                        tracing::warn!(error = ?e, source = %source, "channel feed http error");
                        FetchError::from(e)
                    })?;
                let status = resp.status();
                if !status.is_success() {
                    let message = resp.text().await.unwrap_or_default();
                    return Err(FetchError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
                let body = resp.text().await?;
                Self::parse_feed(&body, source, limit)
            }
        }
    }

    fn name(&self) -> &'static str {
        "youtube_feed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
 <title>Rust</title>
 <entry>
  <id>yt:video:vid2</id>
  <yt:videoId>vid2</yt:videoId>
  <title>Second &amp; newest</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=vid2"/>
  <published>2025-06-02T10:00:00+00:00</published>
  <media:group>
   <media:title>Second</media:title>
   <media:thumbnail url="https://i1.ytimg.com/vi/vid2/hqdefault.jpg" width="480" height="360"/>
   <media:description>More talks.</media:description>
  </media:group>
 </entry>
 <entry>
  <id>yt:video:vid1</id>
  <title>First</title>
  <published>not a date</published>
 </entry>
</feed>"#;

    fn channel() -> TrackedSource {
        TrackedSource::new(Platform::Video, "UC_x5XG1OV2P6uZZ5FSM9Ttw").unwrap()
    }

    #[tokio::test]
    async fn parses_entries_and_media() {
        let f = YoutubeFeedFetcher::from_fixture_str(FEED);
        let posts = f.fetch_recent_posts(&channel(), 10).await.unwrap();
        assert_eq!(posts.len(), 2);

        let p = &posts[0];
        assert_eq!(p.id, "vid2");
        assert_eq!(p.body, "Second & newest\nMore talks.");
        assert_eq!(p.url.as_deref(), Some("https://www.youtube.com/watch?v=vid2"));
        assert_eq!(p.media[0].kind, MediaKind::Thumbnail);
        assert_eq!(p.handle, "UC_x5XG1OV2P6uZZ5FSM9Ttw");

        // id falls back to <id>, bad timestamp falls back to fetch time
        assert_eq!(posts[1].id, "vid1");
        assert!(posts[1].published_at > p.published_at);
    }

    #[tokio::test]
    async fn limit_is_respected() {
        let f = YoutubeFeedFetcher::from_fixture_str(FEED);
        let posts = f.fetch_recent_posts(&channel(), 1).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "vid2");
    }

    #[tokio::test]
    async fn garbage_is_a_parse_error() {
        let f = YoutubeFeedFetcher::from_fixture_str("<feed><entry>");
        let err = f.fetch_recent_posts(&channel(), 5).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }
}
