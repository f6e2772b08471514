//! Text normalization applied to titles, bodies and each pair side.
//!
//! Rules run in a fixed order: markdown links, URLs, emails, phone numbers, user mentions,
//! collection mentions, emphasis markers, names, whitespace. Emails are redacted before
//! mentions are stripped so `@host` inside an address is never half-removed. PII redaction
//! runs again after whitespace is collapsed, since collapsing can join a split number.

use std::borrow::Cow;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::TextProcessing;

pub const PHONE_PLACEHOLDER: &str = "[PHONE]";
pub const EMAIL_PLACEHOLDER: &str = "[EMAIL]";
pub const NAME_PLACEHOLDER: &str = "[NAME]";

pub const URL_PATTERN: &str = r"(?:https?://|www\.)[^\s<>()\[\]]+";
pub const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
pub const PHONE_PATTERN: &str = r"(?:\(\d{3}\)\s?|\b\d{3}[-. ]?)\d{3}[-. ]?\d{4}\b";

#[derive(Clone, Debug)]
pub struct TextNormalizer {
    flags: TextProcessing,
    md_link: Regex,
    url: Regex,
    email: Regex,
    phone: Regex,
    user_mention: Regex,
    collection_mention: Regex,
    emphasis: Regex,
    inline_code: Regex,
    honorific_name: Regex,
    stated_name: Regex,
    whitespace: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("compile pattern {pattern}"))
}

impl TextNormalizer {
    pub fn new(flags: &TextProcessing) -> Result<Self> {
        Ok(Self {
            flags: flags.clone(),
            md_link: compile(r"\[([^\]\n]+)\]\([^)\s]*\)")?,
            url: compile(URL_PATTERN)?,
            email: compile(EMAIL_PATTERN)?,
            phone: compile(PHONE_PATTERN)?,
            user_mention: compile(r"/?\bu/[A-Za-z0-9_-]+|@[A-Za-z0-9_]+")?,
            collection_mention: compile(r"/?\br/[A-Za-z0-9_]+")?,
            emphasis: compile(r"\*{1,2}([^*\n]+)\*{1,2}|\b__([^_\n]+)__\b|\b_([^_\n]+)_\b|~~([^~\n]+)~~")?,
            inline_code: compile(r"`([^`\n]+)`")?,
            honorific_name: compile(r"\b(?:Mr|Mrs|Ms|Miss|Dr|Prof)\.?\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?")?,
            stated_name: compile(r"\b((?i:my name is|i am called|i'm called))\s+[A-Z][a-z]+")?,
            whitespace: compile(r"\s+")?,
        })
    }

    /// Normalize one text field. Empty input yields an empty string.
    pub fn normalize(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let f = &self.flags;
        let mut s: Cow<'_, str> = Cow::Borrowed(text);

        if f.remove_markdown {
            s = Cow::Owned(self.md_link.replace_all(&s, "$1").into_owned());
        }
        if f.remove_urls {
            s = Cow::Owned(self.url.replace_all(&s, "").into_owned());
        }
        if f.remove_pii {
            s = Cow::Owned(self.redact_pii(&s));
        }
        if f.remove_usernames {
            s = Cow::Owned(self.user_mention.replace_all(&s, "").into_owned());
        }
        if f.remove_subreddit_mentions {
            s = Cow::Owned(self.collection_mention.replace_all(&s, "").into_owned());
        }
        if f.remove_markdown {
            s = Cow::Owned(self.emphasis.replace_all(&s, "${1}${2}${3}${4}").into_owned());
            s = Cow::Owned(self.inline_code.replace_all(&s, "$1").into_owned());
        }
        if f.anonymize_names {
            s = Cow::Owned(self.honorific_name.replace_all(&s, NAME_PLACEHOLDER).into_owned());
            s = Cow::Owned(self.stated_name.replace_all(&s, "${1} [NAME]").into_owned());
        }
        if f.normalize_whitespace {
            let collapsed = self.whitespace.replace_all(&s, " ");
            let collapsed = collapsed.trim();
            return if f.remove_pii { self.redact_pii(collapsed) } else { collapsed.to_string() };
        }
        s.into_owned()
    }

    fn redact_pii(&self, text: &str) -> String {
        let s = self.email.replace_all(text, EMAIL_PLACEHOLDER);
        self.phone.replace_all(&s, PHONE_PLACEHOLDER).into_owned()
    }
}
