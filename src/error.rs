//! Failure taxonomy shared by the reader, the workers and the coordinator.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that carry pipeline meaning. Everything else travels as `anyhow::Error`.
#[derive(Error, Debug)]
pub enum EtlError {
    /// Listing a whole collection failed; the collection is skipped.
    #[error("source unavailable for r/{collection}: {reason}")]
    SourceUnavailable { collection: String, reason: String },

    /// Fetching one post's comment tree failed; the post is treated as having no comments.
    #[error("comment fetch failed for post {post_id}: {reason}")]
    CommentFetch { post_id: String, reason: String },

    /// A batch, checkpoint or summary could not be written.
    #[error("persistence failure at {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    /// Operator interrupt observed.
    #[error("run interrupted by operator")]
    Interrupted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EtlError {
    pub fn source_unavailable(collection: &str, reason: impl ToString) -> Self {
        Self::SourceUnavailable { collection: collection.to_string(), reason: reason.to_string() }
    }

    pub fn comment_fetch(post_id: &str, reason: impl ToString) -> Self {
        Self::CommentFetch { post_id: post_id.to_string(), reason: reason.to_string() }
    }

    pub fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Persistence { path: path.into(), reason: reason.to_string() }
    }
}

/// Why a record was dropped. Counted in aggregate, never surfaced one by one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rejection {
    Malformed,
    Structure,
    TooFewPairs,
    LowScore,
    TooLong,
    Language,
    NoSurvivingPairs,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::Malformed => "malformed",
            Rejection::Structure => "structure",
            Rejection::TooFewPairs => "too_few_pairs",
            Rejection::LowScore => "low_score",
            Rejection::TooLong => "too_long",
            Rejection::Language => "language",
            Rejection::NoSurvivingPairs => "no_surviving_pairs",
        }
    }
}
