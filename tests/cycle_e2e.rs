// tests/cycle_e2e.rs
//
// Poll cycle behaviour end to end against the file store, with stub
// fetcher/summarizer collaborators.

mod common;

use std::time::Duration;

use common::*;
use social_digest::config::TrackerConfig;
use social_digest::ingest::select_new;
use social_digest::{FetchError, Platform, TrackedSource, TrackerError};

#[tokio::test]
async fn first_cycle_processes_all_then_only_new_ones() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    h.tracker.add_source(Platform::Microblog, "rustlang").unwrap();

    h.fetcher
        .set_batch("rustlang", vec![tweet("C", 3), tweet("A", 1), tweet("B", 2)]);
    let r1 = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!(r1.processed, 3);
    assert_eq!(h.summarizer.calls(), vec!["A", "B", "C"], "processed oldest first");

    let wm = h.tracker.get_watermark(Platform::Microblog, "rustlang").unwrap();
    assert_eq!(wm.last_seen_time, Some(at(3)));
    assert_eq!(wm.last_seen_id.as_deref(), Some("C"));

    // Same batch again: nothing new, summarizer untouched.
    h.summarizer.reset_calls();
    let r2 = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!((r2.processed, r2.failed, r2.skipped), (0, 0, 0));
    assert!(h.summarizer.calls().is_empty());

    // D shows up on top of the old batch.
    h.fetcher.set_batch(
        "rustlang",
        vec![tweet("D", 4), tweet("C", 3), tweet("B", 2), tweet("A", 1)],
    );
    let r3 = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!(r3.processed, 1);
    assert_eq!(h.summarizer.calls(), vec!["D"]);

    let listed = h
        .tracker
        .list_processed(Some(Platform::Microblog), 10, None)
        .unwrap();
    let ids: Vec<_> = listed.iter().map(|r| r.raw_post.id.as_str()).collect();
    assert_eq!(ids, vec!["D", "C", "B", "A"], "newest first");
    assert!(listed.iter().all(|r| r.provider == "flaky"));
}

#[tokio::test]
async fn selection_is_idempotent_once_the_watermark_is_updated() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    h.tracker.add_source(Platform::Microblog, "rustlang").unwrap();
    let batch = vec![tweet("A", 1), tweet("B", 2), tweet("B", 2)];
    h.fetcher.set_batch("rustlang", batch.clone());

    h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    let wm = h.tracker.get_watermark(Platform::Microblog, "rustlang").unwrap();
    let grace = h.tracker.config().grace_window(Platform::Microblog);
    assert!(select_new(batch, &wm, grace).is_empty());
}

#[tokio::test]
async fn partial_failure_keeps_failed_items_for_the_next_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    h.tracker.add_source(Platform::Microblog, "rustlang").unwrap();
    h.fetcher.set_batch(
        "rustlang",
        (1..=5).map(|i| tweet(&format!("P{i}"), i)).collect(),
    );

    h.summarizer.fail_ids(&["P2", "P5"]);
    let r = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!((r.processed, r.failed), (3, 2));
    assert_eq!(r.errors.len(), 2);
    assert!(r.errors[0].starts_with("P2: "), "{:?}", r.errors);
    assert!(r.errors[1].starts_with("P5: "), "{:?}", r.errors);

    let wm = h.tracker.get_watermark(Platform::Microblog, "rustlang").unwrap();
    assert_eq!(wm.last_seen_time, Some(at(4)), "max of the successes, not of the batch");
    assert!(!wm.has_seen("P2") && !wm.has_seen("P5"));

    h.summarizer.fail_ids(&[]);
    h.summarizer.reset_calls();
    let r = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!((r.processed, r.failed), (2, 0));
    assert_eq!(h.summarizer.calls(), vec!["P2", "P5"]);

    let wm = h.tracker.get_watermark(Platform::Microblog, "rustlang").unwrap();
    assert_eq!(wm.last_seen_time, Some(at(5)));
    assert_eq!(h.tracker.store().records_for(&rustlang()).unwrap().len(), 5);
}

#[tokio::test]
async fn backfill_inside_grace_is_picked_up_outside_is_not() {
    let dir = tempfile::tempdir().unwrap();
    // micro-blog grace defaults to 3 h
    let h = harness(dir.path());
    h.tracker.add_source(Platform::Microblog, "rustlang").unwrap();

    h.fetcher.set_batch("rustlang", vec![tweet("NOW", 10)]);
    h.tracker.trigger_cycle(&rustlang()).await.unwrap();

    h.fetcher.set_batch(
        "rustlang",
        vec![tweet("NOW", 10), tweet("LATE", 8), tweet("ANCIENT", 5)],
    );
    h.summarizer.reset_calls();
    let r = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!(r.processed, 1);
    assert_eq!(h.summarizer.calls(), vec!["LATE"]);

    // watermark does not move backwards for a late success
    let wm = h.tracker.get_watermark(Platform::Microblog, "rustlang").unwrap();
    assert_eq!(wm.last_seen_time, Some(at(10)));
    assert_eq!(wm.last_seen_id.as_deref(), Some("NOW"));
}

#[tokio::test]
async fn fetch_failure_is_local_to_its_source() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    h.tracker.add_source(Platform::Microblog, "rustlang").unwrap();
    h.tracker.add_source(Platform::Microblog, "tokio_rs").unwrap();
    h.fetcher.set_batch("rustlang", vec![tweet("A", 1)]);
    h.fetcher.fail_for("tokio_rs");

    let results = h.tracker.run_all(None).await;
    assert_eq!(results.len(), 2);
    for (source, res) in &results {
        match source.handle.as_str() {
            "rustlang" => assert_eq!(res.as_ref().unwrap().processed, 1),
            "tokio_rs" => assert!(matches!(
                res,
                Err(TrackerError::Fetch {
                    error: FetchError::Api { status: 503, .. },
                    ..
                })
            )),
            other => panic!("unexpected source {other}"),
        }
    }

    let tokio_src = TrackedSource::new(Platform::Microblog, "tokio_rs").unwrap();
    let wm = h.tracker.store().watermark(&tokio_src);
    assert!(wm.last_seen_time.is_none() && wm.seen_ids.is_empty());

    let status = h.tracker.tracking_status();
    assert_eq!(status.recent_cycles.len(), 2);
    assert!(status.last_run.is_some());
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackerConfig {
        fetch_timeout_secs: 2,
        ..TrackerConfig::default()
    };
    let h = harness_with(dir.path(), config);
    h.tracker.add_source(Platform::Microblog, "rustlang").unwrap();
    h.fetcher.set_batch("rustlang", vec![tweet("A", 1)]);
    h.fetcher.set_delay(Duration::from_secs(30));

    let err = h.tracker.trigger_cycle(&rustlang()).await.unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Fetch {
            error: FetchError::Timeout(_),
            ..
        }
    ));
    assert!(h.summarizer.calls().is_empty());
    assert!(!h.tracker.is_busy(&rustlang()), "lock released after failure");
}

#[tokio::test(start_paused = true)]
async fn slow_summary_fails_only_that_post() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackerConfig {
        summarize_timeout_secs: 2,
        ..TrackerConfig::default()
    };
    let h = harness_with(dir.path(), config);
    h.tracker.add_source(Platform::Microblog, "rustlang").unwrap();
    h.fetcher.set_batch("rustlang", vec![tweet("A", 1), tweet("B", 2)]);
    h.summarizer.stall_ids(&["B"]);

    let r = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!(r.processed, 1);
    assert_eq!(r.failed, 1);
    assert_eq!(r.errors.len(), 1);
    assert!(r.errors[0].starts_with("B: "), "{:?}", r.errors);
    assert!(r.errors[0].contains("timed out"), "{:?}", r.errors);

    let wm = h.tracker.get_watermark(Platform::Microblog, "rustlang").unwrap();
    assert_eq!(wm.last_seen_id.as_deref(), Some("A"));
    assert_eq!(wm.last_seen_time, Some(at(1)));
    assert!(wm.has_seen("A") && !wm.has_seen("B"));

    // B is retried once the summarizer answers again
    h.summarizer.stall_ids(&[]);
    let r = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!(r.processed, 1);
    assert_eq!(r.failed, 0);
}

#[tokio::test]
async fn oversized_grace_window_does_not_break_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let config =
        TrackerConfig::from_toml_str("[grace_window_secs]\nmicroblog = 10000000000000000\n")
            .unwrap();
    let h = harness_with(dir.path(), config);
    h.tracker.add_source(Platform::Microblog, "rustlang").unwrap();
    h.fetcher.set_batch("rustlang", vec![tweet("A", 1), tweet("B", 2)]);

    let r = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!(r.processed, 2);
    let r = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!(r.processed, 0);
    assert_eq!(r.failed, 0);
}

#[tokio::test]
async fn seen_ids_stay_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackerConfig {
        seen_capacity: 3,
        ..TrackerConfig::default()
    };
    let h = harness_with(dir.path(), config);
    h.tracker.add_source(Platform::Microblog, "rustlang").unwrap();
    h.fetcher.set_batch(
        "rustlang",
        (1..=6).map(|i| tweet(&format!("T{i}"), i * 2 - 1)).collect(),
    );

    h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    let wm = h.tracker.get_watermark(Platform::Microblog, "rustlang").unwrap();
    assert_eq!(wm.seen_ids.len(), 3);
    assert!(wm.has_seen("T6") && !wm.has_seen("T1"));

    // T1..T3 fell out of the seen-set but are older than watermark - grace (11h - 3h).
    h.summarizer.reset_calls();
    let r = h.tracker.trigger_cycle(&rustlang()).await.unwrap();
    assert_eq!(r.processed, 0);
    assert!(h.summarizer.calls().is_empty());
}
