//! Candidate (prompt, response) pairing with a keyword-density heuristic.
//!
//! The heuristic favours recall; rejecting false positives is the scorer's job.

use ahash::AHashMap;

use crate::model::{CandidatePair, CommentRecord};

/// Number of leading comments considered for post -> comment pairs.
pub const TOP_COMMENTS: usize = 5;
/// Distinct keyword hits needed for a text to count as supportive.
pub const MIN_KEYWORD_HITS: usize = 2;

#[derive(Clone, Debug)]
pub struct PairExtractor {
    keywords: Vec<String>, // lowercase
    min_length: usize,
}

impl PairExtractor {
    pub fn new<I, S>(keywords: I, min_length: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        keywords.sort();
        keywords.dedup();
        Self { keywords, min_length }
    }

    /// How many distinct keywords occur in `text` (case-insensitive substring match).
    pub fn keyword_hits(&self, text: &str) -> usize {
        let lower = text.to_lowercase();
        self.keywords.iter().filter(|k| lower.contains(k.as_str())).count()
    }

    pub fn is_empathetic(&self, text: &str) -> bool {
        self.keyword_hits(text) >= MIN_KEYWORD_HITS
    }

    /// Derive candidate pairs from a post body and its filtered comments.
    ///
    /// Post -> comment pairs come first (first [`TOP_COMMENTS`] comments), then
    /// comment -> reply pairs in comment order. Deterministic for a given input.
    pub fn extract(&self, post_content: &str, comments: &[CommentRecord]) -> Vec<CandidatePair> {
        let mut pairs = Vec::new();

        for c in comments.iter().take(TOP_COMMENTS) {
            if c.body.chars().count() >= self.min_length && self.is_empathetic(&c.body) {
                pairs.push(CandidatePair::new(post_content, c.body.as_str()));
            }
        }

        let by_id: AHashMap<&str, &CommentRecord> =
            comments.iter().map(|c| (c.comment_id.as_str(), c)).collect();
        for c in comments {
            let Some(parent_id) = c.parent_comment_id() else { continue };
            let Some(parent) = by_id.get(parent_id) else { continue };
            if self.is_empathetic(&c.body) && parent.body.chars().count() >= self.min_length {
                pairs.push(CandidatePair::new(parent.body.as_str(), c.body.as_str()));
            }
        }

        pairs
    }
}
