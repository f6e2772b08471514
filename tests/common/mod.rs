#![allow(dead_code)]

use empathy_etl::{CancelToken, EtlError, ExtractOptions, RawComment, RawPost, SourceReader};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Supportive text: hits "sorry", "going through", "understand", "feel" and "hard time".
pub const SUPPORTIVE: &str =
    "I am so sorry you are going through this. I understand how you feel, it is a hard time.";
/// Second supportive text so pairs stay distinguishable.
pub const SUPPORTIVE_2: &str =
    "That sounds really difficult. Your reaction is valid and we are here for you.";
/// Practical advice with none of the empathy keywords.
pub const NEUTRAL: &str = "Have you tried turning the router off and on again this morning?";

/// In-memory `SourceReader` with scripted listings, comment trees and failures.
/// Every call is recorded so tests can assert what was (not) fetched.
#[derive(Default)]
pub struct FakeReader {
    posts: HashMap<String, Vec<RawPost>>,
    comments: HashMap<String, Vec<RawComment>>,
    failing_collections: HashSet<String>,
    failing_posts: HashSet<String>,
    cancel_on_post: Option<(String, CancelToken)>,
    pub listed: Mutex<Vec<String>>,
    pub comment_requests: Mutex<Vec<String>>,
}

impl FakeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, name: &str, posts: Vec<RawPost>) -> Self {
        self.posts.insert(name.to_string(), posts);
        self
    }

    pub fn with_comments(mut self, post_id: &str, comments: Vec<RawComment>) -> Self {
        self.comments.insert(post_id.to_string(), comments);
        self
    }

    /// A collection whose listing always fails.
    pub fn failing_collection(mut self, name: &str) -> Self {
        self.failing_collections.insert(name.to_string());
        self
    }

    /// A post whose comment fetch always fails.
    pub fn failing_comments(mut self, post_id: &str) -> Self {
        self.failing_posts.insert(post_id.to_string());
        self
    }

    /// Trip `token` when the comments of `post_id` are requested (simulated Ctrl-C).
    pub fn cancel_on_post(mut self, post_id: &str, token: CancelToken) -> Self {
        self.cancel_on_post = Some((post_id.to_string(), token));
        self
    }

    /// A collection of `n` posts, each with one supportive and one neutral root comment.
    pub fn with_standard_collection(mut self, name: &str, n: usize) -> Self {
        let mut posts = Vec::new();
        for i in 0..n {
            let id = format!("{name}_p{i}");
            posts.push(post(&id, 50, 5));
            self.comments.insert(
                id.clone(),
                vec![
                    comment(&format!("{id}_a"), SUPPORTIVE, 10, &format!("t3_{id}")),
                    comment(&format!("{id}_b"), NEUTRAL, 4, &format!("t3_{id}")),
                ],
            );
        }
        self.posts.insert(name.to_string(), posts);
        self
    }

    pub fn listed(&self) -> Vec<String> {
        self.listed.lock().unwrap().clone()
    }

    pub fn comment_requests(&self) -> Vec<String> {
        self.comment_requests.lock().unwrap().clone()
    }
}

impl SourceReader for FakeReader {
    fn fetch_posts(&self, collection: &str, limit: usize) -> Result<Vec<RawPost>, EtlError> {
        self.listed.lock().unwrap().push(collection.to_string());
        if self.failing_collections.contains(collection) {
            return Err(EtlError::source_unavailable(collection, "scripted failure"));
        }
        let posts = self.posts.get(collection).cloned().unwrap_or_default();
        Ok(posts.into_iter().take(limit).collect())
    }

    fn fetch_comments(&self, post: &RawPost) -> Result<Vec<RawComment>, EtlError> {
        self.comment_requests.lock().unwrap().push(post.id.clone());
        if let Some((id, token)) = &self.cancel_on_post {
            if *id == post.id {
                token.cancel();
            }
        }
        if self.failing_posts.contains(&post.id) {
            return Err(EtlError::comment_fetch(&post.id, "scripted failure"));
        }
        Ok(self.comments.get(&post.id).cloned().unwrap_or_default())
    }
}

/// A self post with a body comfortably above the minimum length.
pub fn post(id: &str, score: i64, num_comments: u64) -> RawPost {
    RawPost {
        id: id.to_string(),
        title: "Feeling lost after my breakup".to_string(),
        selftext: Some("We were together for six years and now the apartment is so quiet.".to_string()),
        score,
        num_comments,
        created_utc: 1_700_000_000.0,
        url: format!("https://www.reddit.com/r/test/comments/{id}/"),
        is_self: true,
    }
}

/// A comment under `parent` (`t3_<post>` for roots, `t1_<comment>` for replies).
pub fn comment(id: &str, body: &str, score: i64, parent: &str) -> RawComment {
    RawComment {
        id: id.to_string(),
        body: Some(body.to_string()),
        score,
        created_utc: 1_700_000_100.0,
        is_root: parent.starts_with("t3_"),
        parent_id: Some(parent.to_string()),
        depth: if parent.starts_with("t3_") { 0 } else { 1 },
        author: Some("helper".to_string()),
    }
}

/// Extraction options for tests: no rate-limit pause, no progress bars, output under `root`.
pub fn test_options(root: &Path) -> ExtractOptions {
    ExtractOptions::default()
        .with_posts_per_collection(10)
        .with_rate_limit_delay(Duration::ZERO)
        .with_parallel_workers(2)
        .with_progress(false)
        .with_output_dirs(root.join("raw"), root.join("checkpoints"))
}

/// Files in `dir` whose names start with `prefix`, sorted.
pub fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.file_name().and_then(|n| n.to_str()).map_or(false, |n| n.starts_with(prefix)))
            .collect(),
        Err(_) => Vec::new(),
    };
    out.sort();
    out
}

/// Collections as owned names.
pub fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}
