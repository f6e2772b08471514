//! Blocking Reddit API reader (application-only OAuth, read scope only).

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{RedditCredentials, RetryPolicy};
use crate::error::EtlError;
use crate::model::{RawComment, RawPost};
use crate::source::SourceReader;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
const PAGE_LIMIT: usize = 100;
const COMMENT_LIMIT: usize = 500;

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// [`SourceReader`] over the public OAuth API.
///
/// The reader applies its [`RetryPolicy`] to every request; with the default policy each
/// request is tried once.
pub struct RedditApiReader {
    client: Client,
    creds: RedditCredentials,
    retry: RetryPolicy,
    api_base: String,
    token_url: String,
    token: Mutex<Option<AccessToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    after: Option<String>,
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Deserialize)]
struct Thing {
    kind: String,
    data: Value,
}

#[derive(Deserialize)]
struct PostData {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: u64,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    is_self: bool,
}

#[derive(Deserialize)]
struct CommentData {
    id: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    depth: u32,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    replies: Value, // "" when empty, a Listing otherwise
}

impl RedditApiReader {
    pub fn new(creds: RedditCredentials, retry: RetryPolicy, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!creds.client_id.trim().is_empty(), "missing Reddit client id");
        anyhow::ensure!(!creds.client_secret.trim().is_empty(), "missing Reddit client secret");
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(creds.user_agent.clone())
            .build()
            .context("failed to build Reddit HTTP client")?;
        Ok(Self {
            client,
            creds,
            retry,
            api_base: API_BASE.to_string(),
            token_url: TOKEN_URL.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Point the reader at a different host (proxies, mirrors).
    pub fn with_endpoints(mut self, api_base: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.token_url = token_url.into();
        self
    }

    /// One read-only request to confirm the credentials work.
    pub fn check_connection(&self) -> Result<()> {
        self.get_json("/r/test/hot", &[("limit", "1".to_string())]).map(|_| ())
    }

    fn bearer(&self) -> Result<String> {
        let mut guard = self.token.lock();
        if let Some(tok) = guard.as_ref() {
            if Instant::now() < tok.expires_at {
                return Ok(tok.value.clone());
            }
        }
        let resp = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.creds.client_id, Some(&self.creds.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .context("token request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("token request rejected ({status})"));
        }
        let parsed: TokenResponse = resp.json().context("failed to parse token response")?;
        // refresh a minute early
        let ttl = Duration::from_secs(parsed.expires_in.saturating_sub(60).max(1));
        let value = parsed.access_token;
        *guard = Some(AccessToken { value: value.clone(), expires_at: Instant::now() + ttl });
        Ok(value)
    }

    fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.api_base, path);
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let token = self.bearer()?;
            let outcome = self
                .client
                .get(&url)
                .bearer_auth(token)
                .query(&[("raw_json", "1")])
                .query(query)
                .send();
            match outcome {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json::<Value>().with_context(|| format!("decode {url}"));
                    }
                    if status == StatusCode::UNAUTHORIZED {
                        *self.token.lock() = None;
                    }
                    if should_retry(status) && attempt < attempts {
                        let wait = self.retry.delay_for(attempt);
                        tracing::debug!("GET {} -> {}; retry {}/{} in {:?}", url, status, attempt, attempts - 1, wait);
                        thread::sleep(wait);
                        continue;
                    }
                    return Err(anyhow!("GET {url} failed ({status})"));
                }
                Err(err) => {
                    if is_transient(&err) && attempt < attempts {
                        let wait = self.retry.delay_for(attempt);
                        tracing::debug!("GET {} error: {}; retry {}/{} in {:?}", url, err, attempt, attempts - 1, wait);
                        thread::sleep(wait);
                        continue;
                    }
                    return Err(anyhow!(err).context(format!("GET {url}")));
                }
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::UNAUTHORIZED || status.is_server_error()
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

impl SourceReader for RedditApiReader {
    fn fetch_posts(&self, collection: &str, limit: usize) -> Result<Vec<RawPost>, EtlError> {
        let path = format!("/r/{collection}/hot");
        let mut posts = Vec::with_capacity(limit.min(1024));
        let mut after: Option<String> = None;

        while posts.len() < limit {
            let page = (limit - posts.len()).min(PAGE_LIMIT);
            let mut query = vec![("limit", page.to_string())];
            if let Some(a) = &after {
                query.push(("after", a.clone()));
            }
            let body = self
                .get_json(&path, &query)
                .map_err(|e| EtlError::source_unavailable(collection, format!("{e:#}")))?;
            let listing: Listing = serde_json::from_value(body)
                .map_err(|e| EtlError::source_unavailable(collection, format!("unexpected listing shape: {e}")))?;

            let before = posts.len();
            for thing in listing.data.children {
                if thing.kind != "t3" {
                    continue;
                }
                match serde_json::from_value::<PostData>(thing.data) {
                    Ok(p) => posts.push(RawPost {
                        id: p.id,
                        title: p.title,
                        selftext: p.selftext.filter(|s| !s.is_empty()),
                        score: p.score,
                        num_comments: p.num_comments,
                        created_utc: p.created_utc,
                        url: p.url,
                        is_self: p.is_self,
                    }),
                    Err(e) => tracing::debug!("r/{}: skipping unparsable post: {}", collection, e),
                }
            }
            after = listing.data.after;
            if after.is_none() || posts.len() == before {
                break;
            }
        }
        posts.truncate(limit);
        Ok(posts)
    }

    fn fetch_comments(&self, post: &RawPost) -> Result<Vec<RawComment>, EtlError> {
        let path = format!("/comments/{}", post.id);
        let body = self
            .get_json(&path, &[("limit", COMMENT_LIMIT.to_string())])
            .map_err(|e| EtlError::comment_fetch(&post.id, format!("{e:#}")))?;

        // [post listing, comment listing]
        let comments_listing = body
            .as_array()
            .and_then(|parts| parts.get(1))
            .cloned()
            .ok_or_else(|| EtlError::comment_fetch(&post.id, "response is not a [post, comments] pair"))?;
        let listing: Listing = serde_json::from_value(comments_listing)
            .map_err(|e| EtlError::comment_fetch(&post.id, format!("unexpected comment listing: {e}")))?;
        Ok(flatten_comment_tree(listing.data.children))
    }
}

/// Breadth-first flattening of a comment forest; "load more" stubs are dropped.
fn flatten_comment_tree(top: Vec<Thing>) -> Vec<RawComment> {
    let mut out = Vec::new();
    let mut queue: VecDeque<Thing> = top.into_iter().collect();
    while let Some(thing) = queue.pop_front() {
        if thing.kind != "t1" {
            continue;
        }
        let Ok(c) = serde_json::from_value::<CommentData>(thing.data) else { continue };
        if let Ok(replies) = serde_json::from_value::<Listing>(c.replies) {
            queue.extend(replies.data.children);
        }
        let is_root = c.parent_id.as_deref().map(|p| p.starts_with("t3_")).unwrap_or(false);
        out.push(RawComment {
            id: c.id,
            body: c.body,
            score: c.score,
            created_utc: c.created_utc,
            is_root,
            parent_id: c.parent_id,
            depth: c.depth,
            author: c.author,
        });
    }
    out
}
