// src/ingest/mod.rs
pub mod config;
pub mod cycle;
pub mod locks;
pub mod providers;
pub mod scheduler;
pub mod types;

use std::collections::HashSet;

use chrono::Duration;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;

use crate::ingest::types::RawPost;
use crate::store::SourceWatermark;

/// Upper bound on stored post bodies, in chars.
pub const MAX_BODY_CHARS: usize = 5000;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cycle_runs_total", "Poll cycles started, by platform.");
        describe_counter!(
            "cycle_items_processed_total",
            "Posts analyzed and stored."
        );
        describe_counter!(
            "cycle_items_failed_total",
            "Posts whose analysis or storage failed."
        );
        describe_counter!(
            "cycle_fetch_errors_total",
            "Cycles aborted because the fetch failed."
        );
        describe_counter!(
            "cycle_busy_rejections_total",
            "Cycle requests refused because one was already in flight."
        );
        describe_histogram!("cycle_duration_ms", "Poll cycle wall time in milliseconds.");
        describe_gauge!("tracker_last_run_ts", "Unix ts when a poll cycle last finished.");
    });
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[a-z][^>]*>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").expect("ws regex"));
static RE_NL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\n\s*").expect("nl regex"));

/// Normalize fetched text: decode entities, strip tags, collapse whitespace
/// (line breaks survive), cap length.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let no_tags = RE_TAGS.replace_all(&decoded, " ");
    let spaced = RE_WS.replace_all(&no_tags, " ");
    let out = RE_NL.replace_all(&spaced, "\n");
    let out = out.trim();

    if out.chars().count() > MAX_BODY_CHARS {
        out.chars().take(MAX_BODY_CHARS).collect()
    } else {
        out.to_string()
    }
}

/// Select the genuinely new posts of a freshly fetched batch.
///
/// The batch is de-duplicated by id (first occurrence wins) and ordered by
/// `published_at` ascending, ties by id, so downstream processing and
/// watermark advancement are monotonic. A post is new iff its id is unseen
/// and it was published no earlier than `last_seen_time - grace`. A floor
/// outside the representable date range means no floor.
/// Pure: the watermark is not touched.
pub fn select_new(
    batch: impl IntoIterator<Item = RawPost>,
    watermark: &SourceWatermark,
    grace: Duration,
) -> Vec<RawPost> {
    let seen: HashSet<&str> = watermark.seen_ids.iter().map(String::as_str).collect();
    let floor = watermark
        .last_seen_time
        .and_then(|t| t.checked_sub_signed(grace));

    let mut batch_ids: HashSet<String> = HashSet::new();
    let mut out: Vec<RawPost> = batch
        .into_iter()
        .filter(|p| batch_ids.insert(p.id.clone()))
        .filter(|p| !seen.contains(p.id.as_str()))
        .filter(|p| floor.map_or(true, |f| p.published_at >= f))
        .collect();

    out.sort_by(|a, b| {
        a.published_at
            .cmp(&b.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{Platform, TrackedSource};
    use chrono::{TimeZone, Utc};

    fn post(id: &str, hour: u32) -> RawPost {
        RawPost {
            id: id.into(),
            platform: Platform::Microblog,
            handle: "rustlang".into(),
            published_at: Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap(),
            body: format!("post {id}"),
            url: None,
            media: vec![],
        }
    }

    fn empty_wm() -> SourceWatermark {
        SourceWatermark::new(TrackedSource::new(Platform::Microblog, "rustlang").unwrap())
    }

    #[test]
    fn normalize_text_decodes_and_collapses() {
        let s = "  Hello&nbsp;&amp;   <b>world</b>\n\n\n second   line ";
        assert_eq!(normalize_text(s), "Hello & world\nsecond line");
    }

    #[test]
    fn normalize_keeps_angle_text_that_is_not_a_tag() {
        assert_eq!(normalize_text("a < b and 3 > 2"), "a < b and 3 > 2");
    }

    #[test]
    fn empty_batch_is_empty() {
        assert!(select_new(Vec::new(), &empty_wm(), Duration::hours(3)).is_empty());
    }

    #[test]
    fn dedups_and_orders_oldest_first() {
        let batch = vec![post("C", 9), post("A", 7), post("B", 8), post("A", 7), post("D", 8)];
        let ids: Vec<String> = select_new(batch, &empty_wm(), Duration::hours(3))
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["A", "B", "D", "C"]);
    }

    #[test]
    fn seen_ids_are_excluded_even_if_recent() {
        let mut wm = empty_wm();
        wm.record_seen("B");
        wm.advance("B", post("B", 8).published_at);
        let ids: Vec<String> = select_new(vec![post("B", 8), post("C", 9)], &wm, Duration::hours(3))
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["C"]);
    }

    #[test]
    fn out_of_range_grace_means_no_floor() {
        let mut wm = empty_wm();
        wm.record_seen("Z");
        wm.advance("Z", post("Z", 12).published_at);
        let batch = vec![post("old", 1), post("Z", 12)];
        let ids: Vec<String> = select_new(batch, &wm, Duration::days(365 * 1_000_000))
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["old"]);
    }

    #[test]
    fn grace_window_bounds_backfill() {
        let mut wm = empty_wm();
        wm.advance("Z", post("Z", 12).published_at);
        let batch = vec![post("inside", 10), post("edge", 9), post("outside", 8)];
        let ids: Vec<String> = select_new(batch, &wm, Duration::hours(3))
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["edge", "inside"]);
    }
}
