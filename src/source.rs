//! Read-side contract for the remote content platform.

use crate::error::EtlError;
use crate::model::{RawComment, RawPost};

/// Paginated read access to posts and comment trees.
///
/// Implementations must be shareable across worker threads and must not keep pipeline
/// state. Rate limiting is the caller's job. Missing or deleted bodies come back as
/// `None` / empty and are filtered downstream.
pub trait SourceReader: Send + Sync {
    /// Up to `limit` posts of `collection` in `hot` order.
    /// Fails with [`EtlError::SourceUnavailable`].
    fn fetch_posts(&self, collection: &str, limit: usize) -> Result<Vec<RawPost>, EtlError>;

    /// The post's comment tree, flattened breadth-first.
    /// Fails with [`EtlError::CommentFetch`]; callers treat that as zero comments.
    fn fetch_comments(&self, post: &RawPost) -> Result<Vec<RawComment>, EtlError>;
}

impl<R: SourceReader + ?Sized> SourceReader for &R {
    fn fetch_posts(&self, collection: &str, limit: usize) -> Result<Vec<RawPost>, EtlError> {
        (**self).fetch_posts(collection, limit)
    }
    fn fetch_comments(&self, post: &RawPost) -> Result<Vec<RawComment>, EtlError> {
        (**self).fetch_comments(post)
    }
}

impl<R: SourceReader + ?Sized> SourceReader for std::sync::Arc<R> {
    fn fetch_posts(&self, collection: &str, limit: usize) -> Result<Vec<RawPost>, EtlError> {
        (**self).fetch_posts(collection, limit)
    }
    fn fetch_comments(&self, post: &RawPost) -> Result<Vec<RawComment>, EtlError> {
        (**self).fetch_comments(post)
    }
}
