use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::now_rfc3339;

/// Running counters owned by the coordinator and handed to workers by reference.
/// Counters are atomics; the two timestamps sit behind one small lock.
#[derive(Debug)]
pub struct StatsRecorder {
    posts_processed: AtomicU64,
    posts_rejected: AtomicU64,
    comments_extracted: AtomicU64,
    empathy_pairs_found: AtomicU64,
    collections_completed: AtomicU64,
    collections_failed: AtomicU64,
    times: Mutex<Times>,
}

#[derive(Debug, Default)]
struct Times {
    start_time: Option<String>,
    last_checkpoint: Option<String>,
}

/// Point-in-time copy of the counters, as written into checkpoints and summaries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_posts_processed: u64,
    pub posts_rejected: u64,
    pub total_comments_extracted: u64,
    pub empathy_pairs_found: u64,
    pub subreddits_completed: u64,
    pub subreddits_failed: u64,
    pub start_time: Option<String>,
    pub last_checkpoint: Option<String>,
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self {
            posts_processed: AtomicU64::new(0),
            posts_rejected: AtomicU64::new(0),
            comments_extracted: AtomicU64::new(0),
            empathy_pairs_found: AtomicU64::new(0),
            collections_completed: AtomicU64::new(0),
            collections_failed: AtomicU64::new(0),
            times: Mutex::new(Times::default()),
        }
    }
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a checkpoint when resuming.
    pub fn from_snapshot(s: &ExtractionStats) -> Self {
        let r = Self::default();
        r.posts_processed.store(s.total_posts_processed, Ordering::Relaxed);
        r.posts_rejected.store(s.posts_rejected, Ordering::Relaxed);
        r.comments_extracted.store(s.total_comments_extracted, Ordering::Relaxed);
        r.empathy_pairs_found.store(s.empathy_pairs_found, Ordering::Relaxed);
        r.collections_completed.store(s.subreddits_completed, Ordering::Relaxed);
        r.collections_failed.store(s.subreddits_failed, Ordering::Relaxed);
        {
            let mut t = r.times.lock();
            t.start_time = s.start_time.clone();
            t.last_checkpoint = s.last_checkpoint.clone();
        }
        r
    }

    pub fn mark_started(&self) {
        let mut t = self.times.lock();
        if t.start_time.is_none() {
            t.start_time = Some(now_rfc3339());
        }
    }

    /// One accepted conversation.
    pub fn record_accepted(&self, comments: usize, pairs: usize) {
        self.posts_processed.fetch_add(1, Ordering::Relaxed);
        self.comments_extracted.fetch_add(comments as u64, Ordering::Relaxed);
        self.empathy_pairs_found.fetch_add(pairs as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.posts_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collection_done(&self) {
        self.collections_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collection_failed(&self) {
        self.collections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self, label: String) {
        self.times.lock().last_checkpoint = Some(label);
    }

    pub fn snapshot(&self) -> ExtractionStats {
        let t = self.times.lock();
        ExtractionStats {
            total_posts_processed: self.posts_processed.load(Ordering::Relaxed),
            posts_rejected: self.posts_rejected.load(Ordering::Relaxed),
            total_comments_extracted: self.comments_extracted.load(Ordering::Relaxed),
            empathy_pairs_found: self.empathy_pairs_found.load(Ordering::Relaxed),
            subreddits_completed: self.collections_completed.load(Ordering::Relaxed),
            subreddits_failed: self.collections_failed.load(Ordering::Relaxed),
            start_time: t.start_time.clone(),
            last_checkpoint: t.last_checkpoint.clone(),
        }
    }
}
