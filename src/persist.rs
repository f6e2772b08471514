//! Batch files, checkpoints and run summaries on disk.
//!
//! Layout:
//!   <raw_dir>/batch_<seq:03>_<yyyymmdd_hhmmss>.jsonl.gz      one file per group, written once
//!   <raw_dir>/extraction_summary_<yyyymmdd_hhmmss>.json
//!   <checkpoint_dir>/extraction_checkpoint_<yyyymmdd_hhmmss>.json

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::codec::NdjsonWriter;
use crate::config::Compression;
use crate::mem::HostInfo;
use crate::model::ConversationRecord;
use crate::stats::ExtractionStats;
use crate::util::{create_with_backoff, file_stamp, replace_file_atomic_backoff};

pub fn batch_file_name(seq: u32, stamp: &str, compression: Compression) -> String {
    format!("batch_{:03}_{}.{}", seq, stamp, compression.extension())
}

/// Persist one group's conversations as a single compressed NDJSON file.
/// The file appears only once fully written.
pub fn write_batch(dir: &Path, seq: u32, records: &[ConversationRecord], compression: Compression) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(batch_file_name(seq, &file_stamp(), compression));
    let mut w = NdjsonWriter::create(&path, compression)?;
    for r in records {
        w.write_record(r)?;
    }
    w.finish()
}

/// Batch files in `dir`, ordered by sequence number then timestamp.
pub fn discover_batches(dir: &Path) -> Result<Vec<PathBuf>> {
    let re = Regex::new(r"^batch_(\d+)_(\d{8}_\d{6})\.jsonl\.(gz|zst)$")?;
    let mut found: Vec<(u64, String, PathBuf)> = Vec::new();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    for ent in WalkDir::new(dir).min_depth(1).max_depth(1).into_iter().flatten() {
        let Some(name) = ent.file_name().to_str() else { continue };
        if let Some(caps) = re.captures(name) {
            let seq: u64 = caps[1].parse().unwrap_or(u64::MAX);
            found.push((seq, caps[2].to_string(), ent.path().to_path_buf()));
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, _, p)| p).collect())
}

/// Operator-facing snapshot of a run. Never read for correctness, only for resume/visibility.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub extraction_stats: ExtractionStats,
    pub timestamp: String,
    pub host: HostInfo,
    pub completed_subreddits: u64,
    #[serde(default)]
    pub completed_collections: Vec<String>,
    #[serde(default)]
    pub last_batch: Option<u32>,
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact");
    let tmp = path.with_file_name(format!(".{name}.inprogress"));
    {
        let f = create_with_backoff(&tmp, 16, 50).with_context(|| format!("create {}", tmp.display()))?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, value)?;
        w.write_all(b"\n")?;
        let f = w.into_inner().map_err(|e| e.into_error())?;
        f.sync_all()?;
    }
    replace_file_atomic_backoff(&tmp, path)
}

/// `<dir>/<stem>_<stamp>.json`, with a `_<n>` suffix if that name is already taken.
fn unique_stamped_path(dir: &Path, stem: &str) -> PathBuf {
    let stamp = file_stamp();
    let first = dir.join(format!("{stem}_{stamp}.json"));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{stamp}_{n}.json")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

pub fn write_checkpoint(dir: &Path, checkpoint: &Checkpoint) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = unique_stamped_path(dir, "extraction_checkpoint");
    write_json_atomic(&path, checkpoint)?;
    Ok(path)
}

/// Newest checkpoint in `dir`, if any parses.
pub fn latest_checkpoint(dir: &Path) -> Result<Option<(PathBuf, Checkpoint)>> {
    let re = Regex::new(r"^extraction_checkpoint_(\d{8}_\d{6})(?:_(\d+))?\.json$")?;
    if !dir.exists() {
        return Ok(None);
    }
    let mut found: Vec<(String, u32, PathBuf)> = Vec::new();
    for ent in WalkDir::new(dir).min_depth(1).max_depth(1).into_iter().flatten() {
        let Some(name) = ent.file_name().to_str() else { continue };
        if let Some(caps) = re.captures(name) {
            let suffix = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            found.push((caps[1].to_string(), suffix, ent.path().to_path_buf()));
        }
    }
    found.sort();
    for (_, _, path) in found.into_iter().rev() {
        let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(cp) => return Ok(Some((path, cp))),
            Err(e) => tracing::warn!("ignoring unreadable checkpoint {}: {}", path.display(), e),
        }
    }
    Ok(None)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigUsed {
    pub subreddits_targeted: usize,
    pub posts_per_subreddit: usize,
    pub batch_size: usize,
    pub parallel_workers: usize,
}

/// End-of-run record of what was produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub extraction_stats: ExtractionStats,
    pub output_files: Vec<PathBuf>,
    pub total_files: usize,
    pub extraction_completed_at: String,
    pub config_used: ConfigUsed,
    pub failed_collections: Vec<String>,
}

pub fn write_summary(dir: &Path, summary: &ExtractionSummary) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = unique_stamped_path(dir, "extraction_summary");
    write_json_atomic(&path, summary)?;
    Ok(path)
}
