//! Records flowing between stages. Each stage builds new values; nothing is mutated across
//! a stage boundary.

use serde::{Deserialize, Serialize};

/// Score value for pairs that no scorer has looked at yet.
pub const UNSCORED: f64 = -1.0;

/// One post as returned by a source listing (`hot` ordering).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    pub id: String,
    pub title: String,
    pub selftext: Option<String>, // None for deleted / link posts
    pub score: i64,
    pub num_comments: u64,
    pub created_utc: f64,
    pub url: String,
    pub is_self: bool,
}

impl RawPost {
    /// Title and self text joined by a blank line, trimmed.
    pub fn content(&self) -> String {
        let body = self.selftext.as_deref().unwrap_or("");
        format!("{}\n\n{}", self.title, body).trim().to_string()
    }
}

/// One comment from a post's flattened tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawComment {
    pub id: String,
    pub body: Option<String>,
    pub score: i64,
    pub created_utc: f64,
    pub is_root: bool,
    pub parent_id: Option<String>, // fullname: t1_<comment> or t3_<post>
    pub depth: u32,
    pub author: Option<String>,
}

/// Placeholder for authors that are gone or never reported.
pub const DELETED_AUTHOR: &str = "[deleted]";

/// A comment that survived filtering. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub comment_id: String,
    pub body: String,
    pub score: i64,
    pub created_utc: f64,
    pub is_root: bool,
    pub parent_id: Option<String>,
    pub depth: u32,
    pub author: String,
}

impl CommentRecord {
    /// Build from a raw comment whose body is known to be present.
    pub fn from_raw(raw: &RawComment, body: &str) -> Self {
        Self {
            comment_id: raw.id.clone(),
            body: body.to_string(),
            score: raw.score,
            created_utc: raw.created_utc,
            is_root: raw.is_root,
            parent_id: raw.parent_id.clone(),
            depth: raw.depth,
            author: raw
                .author
                .as_deref()
                .filter(|a| !a.trim().is_empty())
                .unwrap_or(DELETED_AUTHOR)
                .to_string(),
        }
    }

    /// Parent comment id when the parent is a comment (`t1_` fullname), not the post.
    pub fn parent_comment_id(&self) -> Option<&str> {
        self.parent_id.as_deref().and_then(|p| p.strip_prefix("t1_"))
    }
}

/// Candidate (prompt, response) pair found at extraction time.
/// Serialized as a two-element JSON array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePair(pub String, pub String);

impl CandidatePair {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self(prompt.into(), response.into())
    }
    pub fn prompt(&self) -> &str {
        &self.0
    }
    pub fn response(&self) -> &str {
        &self.1
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub num_comments: usize,
    pub empathy_pairs_count: usize,
    pub post_created_utc: f64,
    pub post_url: String,
    pub submission_type: String, // "self" | "link"
}

/// One accepted post with its filtered comments and candidate pairs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub subreddit: String,
    pub post_id: String,
    pub post_title: String,
    pub post_content: String,
    pub post_score: i64,
    pub comments: Vec<CommentRecord>,
    pub extracted_at: String,
    pub empathy_pairs: Vec<CandidatePair>,
    pub metadata: ConversationMetadata,
}

/// Content-derived id: first 16 hex chars of md5("<collection>_<post id>").
/// Re-extracting the same post yields the same id.
pub fn conversation_id(collection: &str, post_id: &str) -> String {
    let digest = md5::compute(format!("{collection}_{post_id}").as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairMetadata {
    pub original_input_length: usize,
    pub original_response_length: usize,
    pub cleaned_input_length: usize,
    pub cleaned_response_length: usize,
}

/// Cleaned pair. Both sides are non-empty and at least the configured minimum length.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmpathyPair {
    #[serde(rename = "input", alias = "prompt")]
    pub prompt: String,
    pub response: String,
    pub empathy_score: f64,
    pub quality_score: f64,
    pub pair_metadata: PairMetadata,
}

impl EmpathyPair {
    pub fn is_scored(&self) -> bool {
        self.empathy_score >= 0.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CleanedMetadata {
    pub source_subreddit: String,
    pub original_score: i64,
    pub original_comment_count: u64,
    pub extraction_timestamp: Option<String>,
    pub processing_timestamp: String,
    pub quality_flags: Vec<String>,
}

/// Normalized, anonymized conversation ready for scoring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CleanedRecord {
    pub conversation_id: String,
    pub subreddit: String, // lowercase
    pub context: String,
    pub post_title: String,
    pub empathy_pairs: Vec<EmpathyPair>,
    pub metadata: CleanedMetadata,
}
