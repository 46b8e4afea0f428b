// src/analyze/mod.rs
//! Analysis of fetched posts: the typed `Analysis` record, the summarizer seam,
//! and the local keyword fallback.

pub mod ai_adapter;
pub mod fallback;

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::ingest::types::RawPost;

pub use fallback::{keyword_sentiment, parse_hashtags, LocalSummarizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl FromStr for Sentiment {
    type Err = ();

    /// Lenient: accepts any case and surrounding punctuation ("positive.", "**Negative**").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_ascii_lowercase();
        match t.as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" | "mixed" => Ok(Sentiment::Neutral),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContentType {
    #[default]
    Personal,
    News,
    Promotional,
    Educational,
    Entertainment,
    Opinion,
    Question,
    Announcement,
}

impl ContentType {
    /// Unknown labels fall back to `Personal`.
    pub fn parse_lenient(s: &str) -> Self {
        let t = s
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_ascii_lowercase();
        match t.as_str() {
            "news" => ContentType::News,
            "promotional" | "promotion" | "advertisement" => ContentType::Promotional,
            "educational" | "education" => ContentType::Educational,
            "entertainment" => ContentType::Entertainment,
            "opinion" => ContentType::Opinion,
            "question" => ContentType::Question,
            "announcement" => ContentType::Announcement,
            _ => ContentType::Personal,
        }
    }
}

pub const ENGAGEMENT_MIN: u8 = 1;
pub const ENGAGEMENT_MAX: u8 = 10;
pub const ENGAGEMENT_DEFAULT: u8 = 5;

/// AI-derived description of one post, persisted as-is alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    pub topic: String,
    pub sentiment: Sentiment,
    pub topics: BTreeSet<String>,
    pub content_type: ContentType,
    /// Always within `ENGAGEMENT_MIN..=ENGAGEMENT_MAX`.
    pub engagement_potential: u8,
    /// Lowercase, without the leading `#`.
    pub hashtags: BTreeSet<String>,
}

/// Map an arbitrary rating onto the engagement scale; out-of-range becomes the default.
pub fn clamp_engagement(raw: i64) -> u8 {
    if (ENGAGEMENT_MIN as i64..=ENGAGEMENT_MAX as i64).contains(&raw) {
        raw as u8
    } else {
        ENGAGEMENT_DEFAULT
    }
}

/// External summarization capability. Called at most once per post per cycle.
pub trait Summarizer: Send + Sync {
    fn summarize<'a>(
        &'a self,
        post: &'a RawPost,
    ) -> Pin<Box<dyn Future<Output = Result<Analysis, AnalysisError>> + Send + 'a>>;
    /// Provider name, recorded on every ProcessedRecord.
    fn provider_name(&self) -> &'static str;
}

pub type DynSummarizer = Arc<dyn Summarizer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_parse_is_lenient() {
        assert_eq!("Positive".parse::<Sentiment>(), Ok(Sentiment::Positive));
        assert_eq!(" negative. ".parse::<Sentiment>(), Ok(Sentiment::Negative));
        assert_eq!("**NEUTRAL**".parse::<Sentiment>(), Ok(Sentiment::Neutral));
        assert!("ecstatic".parse::<Sentiment>().is_err());
    }

    #[test]
    fn unknown_content_type_defaults_to_personal() {
        assert_eq!(ContentType::parse_lenient("News"), ContentType::News);
        assert_eq!(ContentType::parse_lenient("meme"), ContentType::Personal);
    }

    #[test]
    fn engagement_is_clamped_to_scale() {
        assert_eq!(clamp_engagement(7), 7);
        assert_eq!(clamp_engagement(0), ENGAGEMENT_DEFAULT);
        assert_eq!(clamp_engagement(11), ENGAGEMENT_DEFAULT);
    }
}
