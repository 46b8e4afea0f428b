// src/analyze/fallback.rs
//! Local analysis without an AI call: lexicon sentiment, hashtag extraction,
//! and a full `Analysis` for short posts or when AI is disabled.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Analysis, ContentType, Sentiment, Summarizer, ENGAGEMENT_DEFAULT};
use crate::error::AnalysisError;
use crate::ingest::types::RawPost;

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).expect("valid sentiment lexicon")
});

static RE_HASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([\p{L}\p{N}_]+)").expect("hashtag regex"));

/// Posts with fewer words than this are never sent to the AI.
pub const SHORT_POST_WORDS: usize = 5;

const LOCAL_SUMMARY_CHARS: usize = 280;

/// Lexicon score with negation: a negator in the previous 1..=3 tokens flips the sign.
pub fn score_text(text: &str) -> i32 {
    let tokens: Vec<String> = tokenize(text).collect();
    let mut score = 0;
    for i in 0..tokens.len() {
        let base = *LEXICON.get(tokens[i].as_str()).unwrap_or(&0);
        if base == 0 {
            continue;
        }
        let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
        score += if negated { -base } else { base };
    }
    score
}

pub fn keyword_sentiment(text: &str) -> Sentiment {
    match score_text(text) {
        s if s > 0 => Sentiment::Positive,
        s if s < 0 => Sentiment::Negative,
        _ => Sentiment::Neutral,
    }
}

/// Distinct, lowercased hashtags without the `#`.
pub fn parse_hashtags(text: &str) -> BTreeSet<String> {
    RE_HASHTAG
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn is_short(post: &RawPost) -> bool {
    word_count(&post.body) < SHORT_POST_WORDS
}

/// Analysis built only from the post text.
pub fn local_analysis(post: &RawPost) -> Analysis {
    let hashtags = parse_hashtags(&post.body);
    let topic = if is_short(post) {
        format!("Short {} post", post.platform)
    } else {
        hashtags
            .iter()
            .next()
            .map(|t| format!("#{t}"))
            .unwrap_or_else(|| "Social media post".to_string())
    };
    Analysis {
        summary: truncate_chars(&post.body, LOCAL_SUMMARY_CHARS),
        topic,
        sentiment: keyword_sentiment(&post.body),
        topics: hashtags.clone(),
        content_type: ContentType::Personal,
        engagement_potential: ENGAGEMENT_DEFAULT,
        hashtags,
    }
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Summarizer used when AI is disabled.
pub struct LocalSummarizer;

impl Summarizer for LocalSummarizer {
    fn summarize<'a>(
        &'a self,
        post: &'a RawPost,
    ) -> Pin<Box<dyn Future<Output = Result<Analysis, AnalysisError>> + Send + 'a>> {
        Box::pin(async move { Ok(local_analysis(post)) })
    }
    fn provider_name(&self) -> &'static str {
        "local"
    }
}

fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "won't"
            | "can't"
            | "cannot"
            | "don't"
            | "doesn't"
            | "without"
    )
}
