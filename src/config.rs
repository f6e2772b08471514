use crate::error::EtlError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Support-oriented communities harvested when no explicit list is given.
pub const DEFAULT_COLLECTIONS: &[&str] = &[
    "relationship_advice", "offmychest", "TrueOffMyChest", "relationships", "AmItheAsshole",
    "unpopularopinion", "confession", "self", "socialskills", "depression",
    "Anxiety", "mentalhealth", "SuicideWatch", "internetparents", "raisedbynarcissists",
    "JustNoMIL", "BreakUps", "grief", "CasualConversation", "MomForAMinute",
    "DadForAMinute", "KindVoice", "toastme", "FreeCompliments", "GetMotivated",
    "decidingtobebetter", "getoutofbed", "progresspics", "loseit", "stopdrinking",
    "leaves", "ADHD", "autism", "bipolar", "BPD",
    "ptsd", "OCD", "eating_disorders", "selfharm", "TwoXChromosomes",
    "MensLib", "teenagers", "college", "jobs", "careerguidance",
    "personalfinance", "povertyfinance", "homeless", "assistance", "RandomKindness",
];

/// Sorrow / understanding / support vocabulary used by the pair heuristic.
pub const DEFAULT_EMPATHY_KEYWORDS: &[&str] = &[
    "sorry", "understand", "feel", "support", "here for you",
    "care", "comfort", "listen", "strength", "brave",
    "difficult", "hard time", "going through", "experience",
    "valid", "normal", "okay to", "makes sense",
];

/// Output compression for batch files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Compression::Gzip => "jsonl.gz",
            Compression::Zstd => "jsonl.zst",
        }
    }

    /// Infer from a file name (`*.gz` / `*.zst`).
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Some(Compression::Gzip),
            Some("zst") => Some(Compression::Zstd),
            _ => None,
        }
    }
}

/// Retry policy applied at the source-reader boundary.
/// `max_attempts = 1` means a single attempt, no retries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub base_delay_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 1, backoff_factor: 2.0, base_delay_secs: 1.0 }
    }
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        Self::default()
    }

    pub fn exponential(max_attempts: u32, base_delay_secs: f64, backoff_factor: f64) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff_factor, base_delay_secs }
    }

    /// Delay before retry number `retry` (1-based): `base * factor^(retry-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16) as i32;
        let secs = self.base_delay_secs * self.backoff_factor.powi(exp);
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs.min(300.0))
        } else {
            Duration::ZERO
        }
    }

    fn validate(&self) -> Result<(), EtlError> {
        if self.max_attempts == 0 {
            return Err(EtlError::InvalidConfig("retry.max_attempts must be >= 1".into()));
        }
        if !(self.backoff_factor.is_finite() && self.backoff_factor >= 1.0) {
            return Err(EtlError::InvalidConfig("retry.backoff_factor must be >= 1.0".into()));
        }
        if !(self.base_delay_secs.is_finite() && self.base_delay_secs >= 0.0) {
            return Err(EtlError::InvalidConfig("retry.base_delay_secs must be >= 0".into()));
        }
        Ok(())
    }
}

/// Extraction options with defaults and builder chaining.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    pub collections: Vec<String>,      // names without "r/"
    pub posts_per_collection: usize,
    pub max_comments_per_post: usize,
    pub min_comment_length: usize,
    pub max_comment_length: usize,
    pub min_post_score: i64,
    pub min_comment_score: i64,
    pub empathy_keywords: Vec<String>, // stored lowercase

    pub batch_size: usize,             // collections per group
    pub parallel_workers: usize,       // worker-pool width per group
    pub rate_limit_delay_secs: f64,    // per-worker pause after each fetched post
    pub checkpoint_every_groups: usize,

    pub raw_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub compression: Compression,
    pub retry: RetryPolicy,

    pub progress: bool,
    pub resume: bool,                  // skip collections listed in the newest checkpoint
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            collections: DEFAULT_COLLECTIONS.iter().map(|s| s.to_string()).collect(),
            posts_per_collection: 500,
            max_comments_per_post: 20,
            min_comment_length: 20,
            max_comment_length: 2000,
            min_post_score: 5,
            min_comment_score: 1,
            empathy_keywords: DEFAULT_EMPATHY_KEYWORDS.iter().map(|s| s.to_string()).collect(),

            batch_size: 50,
            parallel_workers: 8,
            rate_limit_delay_secs: 1.0,
            checkpoint_every_groups: 3,

            raw_dir: PathBuf::from("data/raw"),
            checkpoint_dir: PathBuf::from("data/checkpoints"),
            compression: Compression::Gzip,
            retry: RetryPolicy::default(),

            progress: true,
            resume: false,
        }
    }
}

impl ExtractOptions {
    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.collections = collections.into_iter().map(|s| normalize_collection(s.as_ref())).collect();
        self
    }
    pub fn with_posts_per_collection(mut self, n: usize) -> Self {
        self.posts_per_collection = n;
        self
    }
    pub fn with_max_comments_per_post(mut self, n: usize) -> Self {
        self.max_comments_per_post = n;
        self
    }
    pub fn with_comment_length_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_comment_length = min;
        self.max_comment_length = max;
        self
    }
    pub fn with_min_post_score(mut self, score: i64) -> Self {
        self.min_post_score = score;
        self
    }
    pub fn with_min_comment_score(mut self, score: i64) -> Self {
        self.min_comment_score = score;
        self
    }
    pub fn with_empathy_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.empathy_keywords = keywords.into_iter().map(|s| s.as_ref().trim().to_lowercase()).collect();
        self
    }
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }
    pub fn with_parallel_workers(mut self, n: usize) -> Self {
        self.parallel_workers = n.max(1);
        self
    }
    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay_secs = delay.as_secs_f64();
        self
    }
    pub fn with_checkpoint_every(mut self, groups: usize) -> Self {
        self.checkpoint_every_groups = groups.max(1);
        self
    }
    pub fn with_output_dirs(mut self, raw_dir: impl AsRef<Path>, checkpoint_dir: impl AsRef<Path>) -> Self {
        self.raw_dir = raw_dir.as_ref().to_path_buf();
        self.checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        self
    }
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn with_resume(mut self, yes: bool) -> Self {
        self.resume = yes;
        self
    }

    pub fn rate_limit_delay(&self) -> Duration {
        if self.rate_limit_delay_secs.is_finite() && self.rate_limit_delay_secs > 0.0 {
            Duration::from_secs_f64(self.rate_limit_delay_secs)
        } else {
            Duration::ZERO
        }
    }

    /// Startup validation. Options are immutable once a run starts.
    pub fn validate(&self) -> Result<(), EtlError> {
        if self.collections.is_empty() {
            return Err(EtlError::InvalidConfig("collections must not be empty".into()));
        }
        if self.collections.iter().any(|c| c.trim().is_empty()) {
            return Err(EtlError::InvalidConfig("collection names must not be blank".into()));
        }
        if self.batch_size == 0 {
            return Err(EtlError::InvalidConfig("batch_size must be >= 1".into()));
        }
        if self.parallel_workers == 0 {
            return Err(EtlError::InvalidConfig("parallel_workers must be >= 1".into()));
        }
        if self.checkpoint_every_groups == 0 {
            return Err(EtlError::InvalidConfig("checkpoint_every_groups must be >= 1".into()));
        }
        if self.posts_per_collection == 0 {
            return Err(EtlError::InvalidConfig("posts_per_collection must be >= 1".into()));
        }
        if self.min_comment_length > self.max_comment_length {
            return Err(EtlError::InvalidConfig(format!(
                "min_comment_length ({}) exceeds max_comment_length ({})",
                self.min_comment_length, self.max_comment_length
            )));
        }
        if !(self.rate_limit_delay_secs.is_finite() && self.rate_limit_delay_secs >= 0.0) {
            return Err(EtlError::InvalidConfig("rate_limit_delay_secs must be >= 0".into()));
        }
        if self.empathy_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(EtlError::InvalidConfig("empathy_keywords must not be empty".into()));
        }
        self.retry.validate()
    }
}

/// Strip an optional "r/" prefix and surrounding whitespace. Casing is kept for provenance.
pub fn normalize_collection(name: &str) -> String {
    let s = name.trim();
    let s = s.strip_prefix("/r/").or_else(|| s.strip_prefix("r/")).unwrap_or(s);
    s.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub min_empathy_pairs: usize,
    pub min_post_score: i64,
    pub max_post_length: usize,
    pub min_comment_length: usize, // minimum cleaned length of each pair side
    pub min_empathy_score: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_empathy_pairs: 2,
            min_post_score: 10,
            max_post_length: 2000,
            min_comment_length: 20,
            min_empathy_score: 0.4,
        }
    }
}

/// Toggles for the text normalizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TextProcessing {
    pub remove_urls: bool,
    pub remove_usernames: bool,
    pub remove_subreddit_mentions: bool,
    pub remove_markdown: bool,
    pub remove_pii: bool,
    pub anonymize_names: bool,
    pub normalize_whitespace: bool,
}

impl Default for TextProcessing {
    fn default() -> Self {
        Self {
            remove_urls: true,
            remove_usernames: true,
            remove_subreddit_mentions: true,
            remove_markdown: true,
            remove_pii: true,
            anonymize_names: false,
            normalize_whitespace: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSplits {
    pub train: f64,
    pub validation: f64,
    pub test: f64,
}

impl Default for DatasetSplits {
    fn default() -> Self {
        Self { train: 0.7, validation: 0.15, test: 0.15 }
    }
}

/// Options for the processing pipeline (cleaning and the stages after it).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub parallel_workers: usize,
    pub batch_size: usize,
    pub quality_thresholds: QualityThresholds,
    pub text_processing: TextProcessing,
    pub target_language: String,
    pub dataset_splits: DatasetSplits,
    pub progress: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        let hw = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        Self {
            input_dir: PathBuf::from("data/raw"),
            output_dir: PathBuf::from("data/processed"),
            temp_dir: PathBuf::from("data/temp"),
            parallel_workers: hw.saturating_sub(1).max(1),
            batch_size: 1000,
            quality_thresholds: QualityThresholds::default(),
            text_processing: TextProcessing::default(),
            target_language: "en".to_string(),
            dataset_splits: DatasetSplits::default(),
            progress: true,
        }
    }
}

impl ProcessingConfig {
    pub fn with_dirs(mut self, input: impl AsRef<Path>, output: impl AsRef<Path>, temp: impl AsRef<Path>) -> Self {
        self.input_dir = input.as_ref().to_path_buf();
        self.output_dir = output.as_ref().to_path_buf();
        self.temp_dir = temp.as_ref().to_path_buf();
        self
    }
    pub fn with_parallel_workers(mut self, n: usize) -> Self {
        self.parallel_workers = n.max(1);
        self
    }
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }
    pub fn with_quality_thresholds(mut self, thresholds: QualityThresholds) -> Self {
        self.quality_thresholds = thresholds;
        self
    }
    pub fn with_text_processing(mut self, text: TextProcessing) -> Self {
        self.text_processing = text;
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        if self.batch_size == 0 {
            return Err(EtlError::InvalidConfig("processing.batch_size must be >= 1".into()));
        }
        if self.parallel_workers == 0 {
            return Err(EtlError::InvalidConfig("processing.parallel_workers must be >= 1".into()));
        }
        if self.target_language.trim().is_empty() {
            return Err(EtlError::InvalidConfig("target_language must not be empty".into()));
        }
        let s = &self.dataset_splits;
        if [s.train, s.validation, s.test].iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(EtlError::InvalidConfig("dataset split ratios must be >= 0".into()));
        }
        let total = s.train + s.validation + s.test;
        if (total - 1.0).abs() > 1e-6 {
            return Err(EtlError::InvalidConfig(format!("dataset split ratios sum to {total}, expected 1.0")));
        }
        Ok(())
    }
}

/// Whole-run settings as loaded from a JSON file. Missing keys fall back to defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub extraction: ExtractOptions,
    pub processing: ProcessingConfig,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read settings {}", path.display()))?;
        let mut settings: Settings =
            serde_json::from_str(&raw).with_context(|| format!("parse settings {}", path.display()))?;
        settings.extraction.collections = settings.extraction.collections.iter().map(|c| normalize_collection(c)).collect();
        for k in settings.extraction.empathy_keywords.iter_mut() {
            *k = k.trim().to_lowercase();
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        self.extraction.validate()?;
        self.processing.validate()
    }
}

/// Read-only application credentials for the Reddit API.
#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl std::fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl RedditCredentials {
    /// REDDIT_CLIENT_ID / REDDIT_CLIENT_SECRET are required; REDDIT_USER_AGENT is optional.
    pub fn from_env() -> Result<Self, EtlError> {
        let read = |key: &str| std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let client_id = read("REDDIT_CLIENT_ID")
            .ok_or_else(|| EtlError::InvalidConfig("REDDIT_CLIENT_ID is not set".into()))?;
        let client_secret = read("REDDIT_CLIENT_SECRET")
            .ok_or_else(|| EtlError::InvalidConfig("REDDIT_CLIENT_SECRET is not set".into()))?;
        let user_agent = read("REDDIT_USER_AGENT")
            .unwrap_or_else(|| format!("empathy_etl:v{} (read-only research)", env!("CARGO_PKG_VERSION")));
        Ok(Self { client_id, client_secret, user_agent })
    }
}
