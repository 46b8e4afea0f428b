// src/ingest/types.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FetchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "youtube")]
    Video,
    #[serde(alias = "instagram")]
    Photo,
    #[serde(alias = "twitter", alias = "x")]
    Microblog,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Video, Platform::Photo, Platform::Microblog];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Video => "video",
            Platform::Photo => "photo",
            Platform::Microblog => "microblog",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" | "youtube" => Ok(Platform::Video),
            "photo" | "instagram" => Ok(Platform::Photo),
            "microblog" | "twitter" | "x" => Ok(Platform::Microblog),
            _ => Err(ConfigError::UnknownPlatform(s.to_string())),
        }
    }
}

static RE_CHANNEL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^UC[A-Za-z0-9_-]{22}$").expect("channel id regex"));
static RE_PHOTO_HANDLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9._]{1,30}$").expect("photo handle regex"));
static RE_MICROBLOG_HANDLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]{1,15}$").expect("microblog handle regex"));

/// A tracked account/channel. Unique per `(platform, handle)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackedSource {
    pub platform: Platform,
    pub handle: String,
}

impl TrackedSource {
    /// Normalize and validate a handle for `platform`.
    /// Photo and micro-blog handles are case-insensitive and stored lowercase;
    /// channel ids are kept as given.
    pub fn new(platform: Platform, handle: &str) -> Result<Self, ConfigError> {
        let trimmed = handle.trim().trim_start_matches('@');
        let invalid = |reason| ConfigError::InvalidHandle {
            platform,
            handle: handle.to_string(),
            reason,
        };

        let handle = match platform {
            Platform::Video => {
                if !RE_CHANNEL_ID.is_match(trimmed) {
                    return Err(invalid("expected a channel id like UCxxxxxxxxxxxxxxxxxxxxxx"));
                }
                trimmed.to_string()
            }
            Platform::Photo => {
                let h = trimmed.to_ascii_lowercase();
                if !RE_PHOTO_HANDLE.is_match(&h) {
                    return Err(invalid("1-30 letters, digits, '.' or '_'"));
                }
                if h.starts_with('.') || h.ends_with('.') || h.contains("..") {
                    return Err(invalid("periods cannot lead, trail or repeat"));
                }
                h
            }
            Platform::Microblog => {
                let h = trimmed.to_ascii_lowercase();
                if !RE_MICROBLOG_HANDLE.is_match(&h) {
                    return Err(invalid("1-15 letters, digits or '_'"));
                }
                h
            }
        };

        Ok(Self { platform, handle })
    }
}

impl fmt::Display for TrackedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.handle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Thumbnail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
}

/// A post as returned by a platform fetcher. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPost {
    pub id: String,
    pub platform: Platform,
    pub handle: String,
    pub published_at: DateTime<Utc>,
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

/// Platform-specific scraping collaborator.
#[async_trait::async_trait]
pub trait PostFetcher: Send + Sync {
    async fn fetch_recent_posts(
        &self,
        source: &TrackedSource,
        limit: u32,
    ) -> Result<Vec<RawPost>, FetchError>;
    fn name(&self) -> &'static str;
}
