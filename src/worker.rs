//! Per-collection extraction: list posts, filter, fetch comments, filter, pair, accept.

use crate::cancel::CancelToken;
use crate::config::ExtractOptions;
use crate::model::{conversation_id, CommentRecord, ConversationMetadata, ConversationRecord, RawComment, RawPost};
use crate::pairs::PairExtractor;
use crate::source::SourceReader;
use crate::stats::StatsRecorder;
use crate::util::now_rfc3339;

const LOG_EVERY: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionStatus {
    Completed,
    /// The post listing could not be fetched.
    Failed(String),
    /// Stopped early on operator interrupt.
    Interrupted,
}

/// What one worker hands back to the coordinator at the group barrier.
#[derive(Debug)]
pub struct CollectionResult {
    pub collection: String,
    pub conversations: Vec<ConversationRecord>,
    pub status: CollectionStatus,
}

/// Why a post did not become a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostRejection {
    FewComments,
    LowScore,
    ShortContent,
    FewFilteredComments,
    NoPairs,
}

pub enum PostDecision {
    Accepted(ConversationRecord),
    Rejected(PostRejection),
}

/// Cheap checks that need no remote call.
pub fn precheck_post(post: &RawPost, opts: &ExtractOptions) -> Result<String, PostRejection> {
    if post.num_comments < 2 {
        return Err(PostRejection::FewComments);
    }
    if post.score < opts.min_post_score {
        return Err(PostRejection::LowScore);
    }
    let content = post.content();
    if content.chars().count() < opts.min_comment_length {
        return Err(PostRejection::ShortContent);
    }
    Ok(content)
}

/// Keep comments that have a live body within length bounds and enough score.
/// Only the first `max_comments_per_post` comments of the tree are looked at.
pub fn filter_comments(raw: &[RawComment], opts: &ExtractOptions) -> Vec<CommentRecord> {
    raw.iter()
        .take(opts.max_comments_per_post)
        .filter_map(|c| {
            let body = c.body.as_deref()?;
            let trimmed = body.trim_start();
            if trimmed.starts_with("[deleted]") || trimmed.starts_with("[removed]") {
                return None;
            }
            let len = body.chars().count();
            if len < opts.min_comment_length || len > opts.max_comment_length {
                return None;
            }
            if c.score < opts.min_comment_score {
                return None;
            }
            Some(CommentRecord::from_raw(c, body))
        })
        .collect()
}

/// Post-comment-fetch half of the state machine.
pub fn build_conversation(
    collection: &str,
    post: &RawPost,
    content: String,
    raw_comments: &[RawComment],
    opts: &ExtractOptions,
    extractor: &PairExtractor,
) -> PostDecision {
    let comments = filter_comments(raw_comments, opts);
    if comments.len() < 2 {
        return PostDecision::Rejected(PostRejection::FewFilteredComments);
    }
    let pairs = extractor.extract(&content, &comments);
    if pairs.is_empty() {
        return PostDecision::Rejected(PostRejection::NoPairs);
    }
    let metadata = ConversationMetadata {
        num_comments: comments.len(),
        empathy_pairs_count: pairs.len(),
        post_created_utc: post.created_utc,
        post_url: post.url.clone(),
        submission_type: if post.is_self { "self" } else { "link" }.to_string(),
    };
    PostDecision::Accepted(ConversationRecord {
        conversation_id: conversation_id(collection, &post.id),
        subreddit: collection.to_string(),
        post_id: post.id.clone(),
        post_title: post.title.clone(),
        post_content: content,
        post_score: post.score,
        comments,
        extracted_at: now_rfc3339(),
        empathy_pairs: pairs,
        metadata,
    })
}

/// Drive one collection to completion. Never panics the pool and never fails the group:
/// listing failures end this collection only, per-post problems skip the post.
pub fn extract_collection<R: SourceReader + ?Sized>(
    reader: &R,
    collection: &str,
    opts: &ExtractOptions,
    extractor: &PairExtractor,
    stats: &StatsRecorder,
    cancel: &CancelToken,
) -> CollectionResult {
    let mut conversations = Vec::new();
    if cancel.is_cancelled() {
        return CollectionResult { collection: collection.to_string(), conversations, status: CollectionStatus::Interrupted };
    }

    let posts = match reader.fetch_posts(collection, opts.posts_per_collection) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("r/{}: {}", collection, e);
            stats.record_collection_failed();
            return CollectionResult {
                collection: collection.to_string(),
                conversations,
                status: CollectionStatus::Failed(e.to_string()),
            };
        }
    };

    let delay = opts.rate_limit_delay();
    let mut status = CollectionStatus::Completed;

    for post in &posts {
        if cancel.is_cancelled() {
            status = CollectionStatus::Interrupted;
            break;
        }
        let content = match precheck_post(post, opts) {
            Ok(c) => c,
            Err(_) => {
                stats.record_rejected();
                continue;
            }
        };

        let raw_comments = match reader.fetch_comments(post) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("r/{}: {}; treating post as having no comments", collection, e);
                Vec::new()
            }
        };

        match build_conversation(collection, post, content, &raw_comments, opts, extractor) {
            PostDecision::Accepted(conv) => {
                stats.record_accepted(conv.comments.len(), conv.empathy_pairs.len());
                conversations.push(conv);
                if conversations.len() % LOG_EVERY == 0 {
                    tracing::info!("r/{}: {} conversations so far", collection, conversations.len());
                }
            }
            PostDecision::Rejected(reason) => {
                tracing::debug!("r/{}: post {} rejected ({:?})", collection, post.id, reason);
                stats.record_rejected();
            }
        }

        if !delay.is_zero() && !cancel.sleep(delay) {
            status = CollectionStatus::Interrupted;
            break;
        }
    }

    if status == CollectionStatus::Completed {
        stats.record_collection_done();
    }
    tracing::info!("r/{}: {} conversations ({:?})", collection, conversations.len(), status);
    CollectionResult { collection: collection.to_string(), conversations, status }
}
