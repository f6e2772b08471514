//! Extraction coordinator: groups collections, fans each group out over a bounded pool,
//! persists one batch per group in group order, and checkpoints along the way.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use ahash::AHashSet;
use anyhow::Result;

use crate::cancel::CancelToken;
use crate::concurrency::WorkerPool;
use crate::config::{Compression, ExtractOptions, RetryPolicy};
use crate::error::EtlError;
use crate::mem::host_info;
use crate::pairs::PairExtractor;
use crate::persist::{latest_checkpoint, write_batch, write_checkpoint, write_summary, Checkpoint, ConfigUsed, ExtractionSummary};
use crate::progress::maybe_count_progress;
use crate::source::SourceReader;
use crate::stats::StatsRecorder;
use crate::util::{init_tracing_once, now_rfc3339};
use crate::worker::{extract_collection, CollectionStatus};

#[derive(Clone, Default)]
pub struct Extractor {
    pub(crate) opts: ExtractOptions,
    cancel: CancelToken,
}

/// Mutable bookkeeping for one run, owned by the coordinator thread.
struct RunState {
    stats: StatsRecorder,
    completed: Vec<String>,
    failed: Vec<String>,
    output_files: Vec<PathBuf>,
    next_seq: u32,
    last_batch: Option<u32>,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(opts: ExtractOptions) -> Self {
        Self { opts, cancel: CancelToken::new() }
    }

    // -------- Builder methods --------
    pub fn collections<I, S>(mut self, c: I) -> Self where I: IntoIterator<Item = S>, S: AsRef<str> { self.opts = self.opts.with_collections(c); self }
    pub fn posts_per_collection(mut self, n: usize) -> Self { self.opts = self.opts.with_posts_per_collection(n); self }
    pub fn min_post_score(mut self, s: i64) -> Self { self.opts = self.opts.with_min_post_score(s); self }
    pub fn batch_size(mut self, n: usize) -> Self { self.opts = self.opts.with_batch_size(n); self }
    pub fn parallel_workers(mut self, n: usize) -> Self { self.opts = self.opts.with_parallel_workers(n); self }
    pub fn rate_limit_delay(mut self, d: Duration) -> Self { self.opts = self.opts.with_rate_limit_delay(d); self }
    pub fn checkpoint_every(mut self, groups: usize) -> Self { self.opts = self.opts.with_checkpoint_every(groups); self }
    pub fn output_dirs(mut self, raw: impl AsRef<std::path::Path>, checkpoints: impl AsRef<std::path::Path>) -> Self { self.opts = self.opts.with_output_dirs(raw, checkpoints); self }
    pub fn compression(mut self, c: Compression) -> Self { self.opts = self.opts.with_compression(c); self }
    pub fn retry(mut self, r: RetryPolicy) -> Self { self.opts = self.opts.with_retry(r); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }
    pub fn resume(mut self, yes: bool) -> Self { self.opts = self.opts.with_resume(yes); self }
    pub fn cancel_token(mut self, token: CancelToken) -> Self { self.cancel = token; self }

    pub fn options(&self) -> &ExtractOptions {
        &self.opts
    }

    /// Handle for interrupting a running `run()` from another thread or a signal handler.
    pub fn canceller(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run extraction over all configured collections.
    ///
    /// Errors: `EtlError::InvalidConfig` before any work, `EtlError::Persistence` when a
    /// batch cannot be written, `EtlError::Interrupted` after an operator interrupt. The last
    /// two are returned only after a final checkpoint has been attempted.
    pub fn run<R: SourceReader + ?Sized>(&self, reader: &R) -> Result<ExtractionSummary> {
        init_tracing_once();
        let opts = &self.opts;
        opts.validate()?;

        let pool = WorkerPool::new(opts.parallel_workers, "extract")?;
        let extractor = PairExtractor::new(&opts.empathy_keywords, opts.min_comment_length);
        let mut state = self.initial_state()?;
        state.stats.mark_started();

        let done: AHashSet<&str> = state.completed.iter().map(|s| s.as_str()).collect();
        let mut seen = AHashSet::new();
        let pending: Vec<String> = opts
            .collections
            .iter()
            .filter(|c| !done.contains(c.as_str()))
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect();
        drop(done);

        let total = pending.len();
        let total_groups = total.div_ceil(opts.batch_size);
        let started = Instant::now();
        tracing::info!(
            "starting extraction: {} collections in {} groups (batch_size={}, workers={})",
            total, total_groups, opts.batch_size, pool.width()
        );

        let mut interrupted = false;
        for (gi, group) in pending.chunks(opts.batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            let seq = state.next_seq;
            tracing::info!("group {}/{} (batch {:03}): {}", gi + 1, total_groups, seq, group.join(", "));

            let pb = maybe_count_progress(opts.progress, group.len() as u64, &format!("Batch {seq:03}"));
            let results = pool.map_barrier(group, |collection| {
                let r = extract_collection(reader, collection, opts, &extractor, &state.stats, &self.cancel);
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
                r
            });
            if let Some(pb) = pb {
                pb.finish_with_message(format!("Batch {seq:03} done"));
            }

            let mut conversations = Vec::new();
            let mut group_completed = Vec::new();
            for r in results {
                match &r.status {
                    CollectionStatus::Completed => group_completed.push(r.collection.clone()),
                    CollectionStatus::Failed(_) => state.failed.push(r.collection.clone()),
                    CollectionStatus::Interrupted => interrupted = true,
                }
                conversations.extend(r.conversations);
            }

            let path = match write_batch(&opts.raw_dir, seq, &conversations, opts.compression) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!("batch {:03} could not be written: {:#}", seq, e);
                    self.best_effort_checkpoint(&mut state);
                    return Err(EtlError::persistence(&opts.raw_dir, format!("{e:#}")).into());
                }
            };
            tracing::info!("batch {:03} saved: {} conversations -> {}", seq, conversations.len(), path.display());
            // release this group's records before the next group starts
            drop(conversations);

            state.completed.extend(group_completed);
            state.output_files.push(path);
            state.last_batch = Some(seq);
            state.next_seq += 1;

            let groups_done = gi + 1;
            if groups_done % opts.checkpoint_every_groups == 0 {
                self.best_effort_checkpoint(&mut state);
            }
            let pct = ((groups_done * opts.batch_size) as f64 / total.max(1) as f64 * 100.0).min(100.0);
            tracing::info!("overall progress: {:.1}% complete", pct);

            if interrupted {
                break;
            }
        }

        if interrupted || self.cancel.is_cancelled() {
            tracing::warn!("extraction interrupted after {} batch file(s)", state.output_files.len());
            self.best_effort_checkpoint(&mut state);
            return Err(EtlError::Interrupted.into());
        }

        let stats = state.stats.snapshot();
        tracing::info!("extraction completed in {:.1?}", started.elapsed());
        tracing::info!("  posts processed:     {}", stats.total_posts_processed);
        tracing::info!("  comments extracted:  {}", stats.total_comments_extracted);
        tracing::info!("  empathy pairs found: {}", stats.empathy_pairs_found);
        tracing::info!("  collections done:    {} ({} failed)", stats.subreddits_completed, stats.subreddits_failed);
        tracing::info!("  output files:        {}", state.output_files.len());

        let summary = ExtractionSummary {
            extraction_stats: stats,
            total_files: state.output_files.len(),
            output_files: state.output_files,
            extraction_completed_at: now_rfc3339(),
            config_used: ConfigUsed {
                subreddits_targeted: opts.collections.len(),
                posts_per_subreddit: opts.posts_per_collection,
                batch_size: opts.batch_size,
                parallel_workers: opts.parallel_workers,
            },
            failed_collections: state.failed,
        };
        let summary_path = write_summary(&opts.raw_dir, &summary)
            .map_err(|e| EtlError::persistence(&opts.raw_dir, format!("{e:#}")))?;
        tracing::info!("extraction summary saved: {}", summary_path.display());
        Ok(summary)
    }

    fn initial_state(&self) -> Result<RunState> {
        let fresh = RunState {
            stats: StatsRecorder::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            output_files: Vec::new(),
            next_seq: 1,
            last_batch: None,
        };
        if !self.opts.resume {
            return Ok(fresh);
        }
        match latest_checkpoint(&self.opts.checkpoint_dir)? {
            Some((path, cp)) => {
                tracing::info!(
                    "resuming from {}: {} collections already done, last batch {:?}",
                    path.display(),
                    cp.completed_collections.len(),
                    cp.last_batch
                );
                Ok(RunState {
                    stats: StatsRecorder::from_snapshot(&cp.extraction_stats),
                    next_seq: cp.last_batch.map(|b| b + 1).unwrap_or(1),
                    last_batch: cp.last_batch,
                    completed: cp.completed_collections,
                    ..fresh
                })
            }
            None => {
                tracing::info!("resume requested but no checkpoint found; starting fresh");
                Ok(fresh)
            }
        }
    }

    /// Checkpoints are advisory: a failed write is logged, not fatal.
    fn best_effort_checkpoint(&self, state: &mut RunState) {
        let stats = state.stats.snapshot();
        let cp = Checkpoint {
            completed_subreddits: stats.subreddits_completed,
            extraction_stats: stats,
            timestamp: now_rfc3339(),
            host: host_info(self.opts.parallel_workers),
            completed_collections: state.completed.clone(),
            last_batch: state.last_batch,
        };
        match write_checkpoint(&self.opts.checkpoint_dir, &cp) {
            Ok(path) => {
                tracing::info!("checkpoint saved: {}", path.display());
                state.stats.record_checkpoint(path.display().to_string());
            }
            Err(e) => tracing::error!("checkpoint write failed: {:#}", e),
        }
    }
}
