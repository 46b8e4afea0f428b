// src/ingest/config.rs
//! Seed list of tracked sources, imported when the store has none yet.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::ingest::types::{Platform, TrackedSource};

#[derive(Debug, Default, serde::Deserialize)]
struct SeedFile {
    #[serde(default, alias = "youtube")]
    video: Vec<String>,
    #[serde(default, alias = "instagram")]
    photo: Vec<String>,
    #[serde(default, alias = "twitter")]
    microblog: Vec<String>,
}

/// Load seed sources from a TOML or JSON file. A missing file yields an empty list.
pub fn load_seed_sources(path: &Path) -> Result<Vec<TrackedSource>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading seed sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_seed(&content, ext.as_str())
}

fn parse_seed(s: &str, hint_ext: &str) -> Result<Vec<TrackedSource>> {
    let seed: SeedFile = if hint_ext == "json" {
        serde_json::from_str(s).context("parsing seed sources json")?
    } else if let Ok(v) = toml::from_str::<SeedFile>(s) {
        v
    } else if let Ok(v) = serde_json::from_str::<SeedFile>(s) {
        v
    } else {
        return Err(anyhow!("unsupported seed sources format"));
    };
    Ok(clean_list(seed))
}

/// Validate, normalize and de-duplicate; invalid entries are skipped with a warning.
fn clean_list(seed: SeedFile) -> Vec<TrackedSource> {
    let mut set = BTreeSet::new();
    for (platform, handles) in [
        (Platform::Video, seed.video),
        (Platform::Photo, seed.photo),
        (Platform::Microblog, seed.microblog),
    ] {
        for h in handles {
            if h.trim().is_empty() {
                continue;
            }
            match TrackedSource::new(platform, &h) {
                Ok(src) => {
                    set.insert(src);
                }
                Err(e) => tracing::warn!(error = %e, "skipping seed source"),
            }
        }
    }
    set.into_iter().collect()
}
