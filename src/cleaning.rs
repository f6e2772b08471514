//! Cleaning stage: validate, threshold, normalize, language-filter and restructure raw
//! conversations into `CleanedRecord`s.
//!
//! Input records are read loosely so older or hand-assembled batch files still clean:
//! pairs may be two-element arrays or keyed objects, and the post score may sit at the top
//! level or under `metadata`.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::concurrency::WorkerPool;
use crate::config::{ProcessingConfig, QualityThresholds};
use crate::error::Rejection;
use crate::language::{LanguageDetector, WhatlangDetector};
use crate::mem::maybe_throttle_low_memory;
use crate::model::{CandidatePair, CleanedMetadata, CleanedRecord, EmpathyPair, PairMetadata, UNSCORED};
use crate::progress::maybe_count_progress;
use crate::text::TextNormalizer;
use crate::util::now_rfc3339;

/// Keys recognized for the prompt side of a keyed pair, in precedence order.
pub const PROMPT_KEYS: &[&str] = &["input", "user_message", "question", "prompt"];
/// Keys recognized for the response side of a keyed pair, in precedence order.
pub const RESPONSE_KEYS: &[&str] = &["response", "assistant_message", "answer"];

/// Pairs enter the cleaner as one of two shapes and leave as a `CandidatePair`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum PairInput {
    Sequence(Vec<Value>),
    Mapping(Map<String, Value>),
}

fn non_empty_str(v: &Value) -> Option<&str> {
    v.as_str().filter(|s| !s.trim().is_empty())
}

impl PairInput {
    pub fn from_value(v: Value) -> Option<Self> {
        serde_json::from_value(v).ok()
    }

    /// Canonical pair, or `None` when either side is missing or blank.
    pub fn into_candidate(self) -> Option<CandidatePair> {
        match self {
            PairInput::Sequence(items) => {
                let prompt = items.first().and_then(non_empty_str)?;
                let response = items.get(1).and_then(non_empty_str)?;
                Some(CandidatePair::new(prompt, response))
            }
            PairInput::Mapping(map) => {
                let pick = |keys: &[&str]| keys.iter().find_map(|k| map.get(*k).and_then(non_empty_str)).map(str::to_string);
                Some(CandidatePair::new(pick(PROMPT_KEYS)?, pick(RESPONSE_KEYS)?))
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    post_score: Option<i64>,
    #[serde(default)]
    num_comments: Option<u64>,
    #[serde(default)]
    extraction_timestamp: Option<String>,
}

/// Loose view of an extracted conversation line.
#[derive(Debug, Deserialize)]
struct RawConversation {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    subreddit: Option<String>,
    #[serde(default)]
    post_title: Option<String>,
    #[serde(default)]
    post_content: Option<String>,
    #[serde(default)]
    post_score: Option<i64>,
    #[serde(default)]
    comments: Option<Vec<Value>>,
    #[serde(default)]
    extracted_at: Option<String>,
    #[serde(default)]
    empathy_pairs: Option<Value>,
    #[serde(default)]
    metadata: Option<RawMetadata>,
}

impl RawConversation {
    fn post_score(&self) -> i64 {
        self.post_score
            .or_else(|| self.metadata.as_ref().and_then(|m| m.post_score))
            .unwrap_or(0)
    }

    fn comment_count(&self) -> u64 {
        self.metadata
            .as_ref()
            .and_then(|m| m.num_comments)
            .or_else(|| self.comments.as_ref().map(|c| c.len() as u64))
            .unwrap_or(0)
    }

    fn extraction_timestamp(&self) -> Option<String> {
        self.extracted_at
            .clone()
            .or_else(|| self.metadata.as_ref().and_then(|m| m.extraction_timestamp.clone()))
    }
}

/// Stable cleaned id.
///
/// Ids shorter than 5 characters (or absent) are replaced by
/// `clean_<collection>_<md5(collection + first 100 chars of body)[..12]>`; longer ids are kept
/// with every character outside `[A-Za-z0-9_-]` replaced by `_`.
pub fn derive_clean_id(original_id: Option<&str>, collection: &str, body: &str) -> String {
    match original_id {
        Some(id) if id.chars().count() >= 5 => {
            let sanitized: String = id
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
                .collect();
            format!("clean_{sanitized}")
        }
        _ => {
            let prefix: String = body.chars().take(100).collect();
            let digest = format!("{:x}", md5::compute(format!("{collection}{prefix}").as_bytes()));
            format!("clean_{}_{}", collection, &digest[..12])
        }
    }
}

/// Accepted records and rejections by reason for one or more batches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningTally {
    pub accepted: u64,
    pub malformed: u64,
    pub structure: u64,
    pub too_few_pairs: u64,
    pub low_score: u64,
    pub too_long: u64,
    pub language: u64,
    pub no_surviving_pairs: u64,
}

impl CleaningTally {
    pub fn record(&mut self, r: Rejection) {
        let slot = match r {
            Rejection::Malformed => &mut self.malformed,
            Rejection::Structure => &mut self.structure,
            Rejection::TooFewPairs => &mut self.too_few_pairs,
            Rejection::LowScore => &mut self.low_score,
            Rejection::TooLong => &mut self.too_long,
            Rejection::Language => &mut self.language,
            Rejection::NoSurvivingPairs => &mut self.no_surviving_pairs,
        };
        *slot += 1;
    }

    pub fn merge(&mut self, other: &CleaningTally) {
        self.accepted += other.accepted;
        self.malformed += other.malformed;
        self.structure += other.structure;
        self.too_few_pairs += other.too_few_pairs;
        self.low_score += other.low_score;
        self.too_long += other.too_long;
        self.language += other.language;
        self.no_surviving_pairs += other.no_surviving_pairs;
    }

    pub fn rejected(&self) -> u64 {
        self.malformed + self.structure + self.too_few_pairs + self.low_score + self.too_long + self.language + self.no_surviving_pairs
    }
}

/// Pairs considered when sampling text for language identification.
const LANGUAGE_SAMPLE_PAIRS: usize = 3;
const LOW_MEMORY_FRACTION: f64 = 0.10;

/// Stateless record cleaner. Shared by reference across cleaning workers.
#[derive(Clone)]
pub struct DataCleaner {
    thresholds: QualityThresholds,
    normalizer: TextNormalizer,
    detector: Arc<dyn LanguageDetector>,
    target_language: String,
}

impl DataCleaner {
    pub fn new(config: &ProcessingConfig) -> Result<Self> {
        Ok(Self {
            thresholds: config.quality_thresholds.clone(),
            normalizer: TextNormalizer::new(&config.text_processing)?,
            detector: Arc::new(WhatlangDetector::new()),
            target_language: config.target_language.to_lowercase(),
        })
    }

    pub fn with_detector(mut self, detector: Arc<dyn LanguageDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn normalizer(&self) -> &TextNormalizer {
        &self.normalizer
    }

    /// Clean one NDJSON line.
    pub fn clean_line(&self, line: &str) -> Result<CleanedRecord, Rejection> {
        let raw: RawConversation = serde_json::from_str(line).map_err(|_| Rejection::Malformed)?;
        self.clean_raw(raw)
    }

    /// Clean any serializable conversation-shaped value (e.g. a `ConversationRecord`).
    pub fn clean_record<T: Serialize>(&self, record: &T) -> Result<CleanedRecord, Rejection> {
        let v = serde_json::to_value(record).map_err(|_| Rejection::Malformed)?;
        let raw: RawConversation = serde_json::from_value(v).map_err(|_| Rejection::Malformed)?;
        self.clean_raw(raw)
    }

    fn clean_raw(&self, raw: RawConversation) -> Result<CleanedRecord, Rejection> {
        // structure
        let collection = raw.subreddit.as_deref().map(str::trim).filter(|s| !s.is_empty()).ok_or(Rejection::Structure)?;
        let pair_values = match &raw.empathy_pairs {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => return Err(Rejection::Structure),
        };

        // thresholds
        let t = &self.thresholds;
        if pair_values.len() < t.min_empathy_pairs {
            return Err(Rejection::TooFewPairs);
        }
        if raw.post_score() < t.min_post_score {
            return Err(Rejection::LowScore);
        }
        let body = raw.post_content.as_deref().unwrap_or("");
        if body.chars().count() > t.max_post_length {
            return Err(Rejection::TooLong);
        }

        // normalization
        let context = self.normalizer.normalize(body);
        let post_title = self.normalizer.normalize(raw.post_title.as_deref().unwrap_or(""));
        let candidates: Vec<(CandidatePair, CandidatePair)> = pair_values
            .iter()
            .filter_map(|v| PairInput::from_value(v.clone())?.into_candidate())
            .map(|orig| {
                let cleaned = CandidatePair::new(
                    self.normalizer.normalize(orig.prompt()),
                    self.normalizer.normalize(orig.response()),
                );
                (orig, cleaned)
            })
            .collect();

        // language
        let mut sample = context.clone();
        for (_, c) in candidates.iter().take(LANGUAGE_SAMPLE_PAIRS) {
            sample.push(' ');
            sample.push_str(c.prompt());
            sample.push(' ');
            sample.push_str(c.response());
        }
        if let Some(lang) = self.detector.detect(&sample) {
            if lang != self.target_language {
                return Err(Rejection::Language);
            }
        }

        // pairs
        let min_len = t.min_comment_length;
        let empathy_pairs: Vec<EmpathyPair> = candidates
            .into_iter()
            .filter_map(|(orig, cleaned)| {
                let in_len = cleaned.prompt().chars().count();
                let out_len = cleaned.response().chars().count();
                if in_len < min_len || out_len < min_len {
                    return None;
                }
                Some(EmpathyPair {
                    pair_metadata: PairMetadata {
                        original_input_length: orig.prompt().chars().count(),
                        original_response_length: orig.response().chars().count(),
                        cleaned_input_length: in_len,
                        cleaned_response_length: out_len,
                    },
                    prompt: cleaned.0,
                    response: cleaned.1,
                    empathy_score: UNSCORED,
                    quality_score: UNSCORED,
                })
            })
            .collect();
        if empathy_pairs.is_empty() {
            return Err(Rejection::NoSurvivingPairs);
        }

        Ok(CleanedRecord {
            conversation_id: derive_clean_id(raw.conversation_id.as_deref(), collection, body),
            subreddit: collection.to_lowercase(),
            context,
            post_title,
            empathy_pairs,
            metadata: CleanedMetadata {
                source_subreddit: collection.to_string(),
                original_score: raw.post_score(),
                original_comment_count: raw.comment_count(),
                extraction_timestamp: raw.extraction_timestamp(),
                processing_timestamp: now_rfc3339(),
                quality_flags: Vec::new(),
            },
        })
    }

    /// Clean one batch. Rejected records are dropped and counted; nothing here fails the batch.
    pub fn clean_batch(&self, lines: &[String]) -> (Vec<CleanedRecord>, CleaningTally) {
        let mut out = Vec::with_capacity(lines.len());
        let mut tally = CleaningTally::default();
        for line in lines {
            maybe_throttle_low_memory(LOW_MEMORY_FRACTION);
            match self.clean_line(line) {
                Ok(rec) => {
                    tally.accepted += 1;
                    out.push(rec);
                }
                Err(r) => {
                    tracing::debug!("record rejected: {}", r.as_str());
                    tally.record(r);
                }
            }
        }
        (out, tally)
    }

    /// Clean all lines in fixed-size batches over `pool`.
    pub fn clean_all(&self, lines: &[String], batch_size: usize, pool: &WorkerPool, progress: bool) -> (Vec<CleanedRecord>, CleaningTally) {
        let batches: Vec<&[String]> = lines.chunks(batch_size.max(1)).collect();
        let pb = maybe_count_progress(progress, batches.len() as u64, "Cleaning batches");
        let results = pool.map_barrier(&batches, |batch| {
            let r = self.clean_batch(batch);
            if let Some(pb) = &pb {
                pb.inc(1);
            }
            r
        });
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let mut records = Vec::new();
        let mut tally = CleaningTally::default();
        for (recs, t) in results {
            records.extend(recs);
            tally.merge(&t);
        }
        (records, tally)
    }
}
