// src/config/mod.rs
//! Tracker configuration: `config/tracker.toml` plus env overrides.

pub mod ai;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

use crate::ingest::types::Platform;

pub const DEFAULT_TRACKER_CONFIG_PATH: &str = "config/tracker.toml";
pub const ENV_TRACKER_CONFIG_PATH: &str = "TRACKER_CONFIG_PATH";
pub const ENV_INTERVAL_SECS: &str = "TRACKER_INTERVAL_SECS";
pub const ENV_DATA_DIR: &str = "TRACKER_DATA_DIR";

/// Longest accepted grace window (one year).
pub const MAX_GRACE_WINDOW_SECS: u64 = 365 * 24 * 3600;

/// A value that may differ per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerPlatform<T> {
    pub video: T,
    pub photo: T,
    pub microblog: T,
}

impl<T: Copy> PerPlatform<T> {
    pub fn get(&self, platform: Platform) -> T {
        match platform {
            Platform::Video => self.video,
            Platform::Photo => self.photo,
            Platform::Microblog => self.microblog,
        }
    }
}

/// Table as written in the file; missing platforms take the default.
#[derive(Deserialize)]
struct PartialPerPlatform<T> {
    video: Option<T>,
    photo: Option<T>,
    microblog: Option<T>,
}

impl<T: Copy> PartialPerPlatform<T> {
    fn or(self, defaults: PerPlatform<T>) -> PerPlatform<T> {
        PerPlatform {
            video: self.video.unwrap_or(defaults.video),
            photo: self.photo.unwrap_or(defaults.photo),
            microblog: self.microblog.unwrap_or(defaults.microblog),
        }
    }
}

fn fetch_limit_table<'de, D: Deserializer<'de>>(d: D) -> Result<PerPlatform<u32>, D::Error> {
    Ok(PartialPerPlatform::<u32>::deserialize(d)?.or(default_fetch_limit()))
}

fn grace_window_table<'de, D: Deserializer<'de>>(d: D) -> Result<PerPlatform<u64>, D::Error> {
    Ok(PartialPerPlatform::<u64>::deserialize(d)?.or(default_grace_window_secs()))
}

fn default_interval_secs() -> u64 {
    6 * 3600
}
fn default_fetch_limit() -> PerPlatform<u32> {
    PerPlatform {
        video: 5,
        photo: 12,
        microblog: 20,
    }
}
/// Backfill tolerance. Video uploads are often scheduled or published late,
/// micro-blog timelines reorder within hours.
fn default_grace_window_secs() -> PerPlatform<u64> {
    PerPlatform {
        video: 48 * 3600,
        photo: 6 * 3600,
        microblog: 3 * 3600,
    }
}
fn default_seen_capacity() -> usize {
    500
}
fn default_fetch_timeout_secs() -> u64 {
    300
}
fn default_summarize_timeout_secs() -> u64 {
    90
}
fn default_history_capacity() -> usize {
    200
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_sources_seed_path() -> PathBuf {
    PathBuf::from("config/sources.toml")
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_limit", deserialize_with = "fetch_limit_table")]
    pub fetch_limit: PerPlatform<u32>,
    /// Clamped to `MAX_GRACE_WINDOW_SECS`.
    #[serde(default = "default_grace_window_secs", deserialize_with = "grace_window_table")]
    pub grace_window_secs: PerPlatform<u64>,
    /// Bound on remembered post ids per source.
    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_summarize_timeout_secs")]
    pub summarize_timeout_secs: u64,
    /// Cycle results kept in memory for the status page.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_sources_seed_path")]
    pub sources_seed_path: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_limit: default_fetch_limit(),
            grace_window_secs: default_grace_window_secs(),
            seen_capacity: default_seen_capacity(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            summarize_timeout_secs: default_summarize_timeout_secs(),
            history_capacity: default_history_capacity(),
            data_dir: default_data_dir(),
            sources_seed_path: default_sources_seed_path(),
        }
    }
}

impl TrackerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: TrackerConfig = toml::from_str(s).context("parsing tracker config")?;
        Ok(cfg.sanitized())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading tracker config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// `$TRACKER_CONFIG_PATH`, then `config/tracker.toml`, then defaults;
    /// `$TRACKER_INTERVAL_SECS` and `$TRACKER_DATA_DIR` override the file.
    pub fn load_default() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_TRACKER_CONFIG_PATH) {
            Ok(p) => Self::load_from(Path::new(&p))?,
            Err(_) => {
                let p = PathBuf::from(DEFAULT_TRACKER_CONFIG_PATH);
                if p.exists() {
                    Self::load_from(&p)?
                } else {
                    Self::default()
                }
            }
        };

        if let Some(secs) = std::env::var(ENV_INTERVAL_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            cfg.interval_secs = secs;
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.trim().is_empty() {
                cfg.data_dir = PathBuf::from(dir);
            }
        }
        Ok(cfg.sanitized())
    }

    /// Zero intervals, capacities and timeouts are replaced by defaults;
    /// grace windows are clamped.
    fn sanitized(mut self) -> Self {
        if self.interval_secs == 0 {
            self.interval_secs = default_interval_secs();
        }
        if self.seen_capacity == 0 {
            self.seen_capacity = default_seen_capacity();
        }
        if self.fetch_timeout_secs == 0 {
            self.fetch_timeout_secs = default_fetch_timeout_secs();
        }
        if self.summarize_timeout_secs == 0 {
            self.summarize_timeout_secs = default_summarize_timeout_secs();
        }
        if self.history_capacity == 0 {
            self.history_capacity = default_history_capacity();
        }
        let limits = default_fetch_limit();
        for (slot, default) in [
            (&mut self.fetch_limit.video, limits.video),
            (&mut self.fetch_limit.photo, limits.photo),
            (&mut self.fetch_limit.microblog, limits.microblog),
        ] {
            if *slot == 0 {
                *slot = default;
            }
        }
        for slot in [
            &mut self.grace_window_secs.video,
            &mut self.grace_window_secs.photo,
            &mut self.grace_window_secs.microblog,
        ] {
            *slot = (*slot).min(MAX_GRACE_WINDOW_SECS);
        }
        self
    }

    pub fn grace_window(&self, platform: Platform) -> chrono::Duration {
        let secs = self.grace_window_secs.get(platform).min(MAX_GRACE_WINDOW_SECS);
        chrono::Duration::try_seconds(secs as i64).unwrap_or_else(chrono::Duration::zero)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_secs(self.summarize_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = TrackerConfig::from_toml_str(
            r#"
interval_secs = 600
seen_capacity = 0

[grace_window_secs]
video = 3600
photo = 60
microblog = 0
"#,
        )
        .unwrap();
        assert_eq!(cfg.interval_secs, 600);
        assert_eq!(cfg.seen_capacity, 500);
        assert_eq!(cfg.grace_window(Platform::Video), chrono::Duration::hours(1));
        assert_eq!(cfg.grace_window(Platform::Microblog), chrono::Duration::zero());
        assert_eq!(cfg.fetch_limit.get(Platform::Microblog), 20);
        assert_eq!(cfg.data_dir, PathBuf::from("state"));
    }

    #[test]
    fn partial_platform_tables_fill_missing_entries() {
        let cfg = TrackerConfig::from_toml_str(
            r#"
[fetch_limit]
photo = 3

[grace_window_secs]
microblog = 60
"#,
        )
        .unwrap();
        assert_eq!(cfg.fetch_limit.get(Platform::Photo), 3);
        assert_eq!(cfg.fetch_limit.get(Platform::Video), 5);
        assert_eq!(cfg.grace_window(Platform::Microblog), chrono::Duration::seconds(60));
        assert_eq!(cfg.grace_window(Platform::Video), chrono::Duration::hours(48));
        assert_eq!(cfg.grace_window(Platform::Photo), chrono::Duration::hours(6));
    }

    #[test]
    fn huge_grace_window_is_clamped() {
        let cfg = TrackerConfig::from_toml_str(
            "[grace_window_secs]\nmicroblog = 10000000000000000\n",
        )
        .unwrap();
        assert_eq!(cfg.grace_window_secs.microblog, MAX_GRACE_WINDOW_SECS);
        assert_eq!(cfg.grace_window(Platform::Microblog), chrono::Duration::days(365));

        // built in code, bypassing the file
        let mut raw = TrackerConfig::default();
        raw.grace_window_secs.video = u64::MAX;
        assert_eq!(raw.grace_window(Platform::Video), chrono::Duration::days(365));
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("tracker.toml");
        std::fs::write(&p, "interval_secs = 120\n").unwrap();

        env::set_var(ENV_TRACKER_CONFIG_PATH, p.display().to_string());
        env::set_var(ENV_INTERVAL_SECS, "45");
        env::set_var(ENV_DATA_DIR, "/tmp/social-digest-test");
        let cfg = TrackerConfig::load_default().unwrap();
        env::remove_var(ENV_TRACKER_CONFIG_PATH);
        env::remove_var(ENV_INTERVAL_SECS);
        env::remove_var(ENV_DATA_DIR);

        assert_eq!(cfg.interval_secs, 45);
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/social-digest-test"));
    }
}
