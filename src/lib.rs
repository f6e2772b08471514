mod config;
mod error;
mod model;
mod util;
mod mem;
mod progress;
mod concurrency;
mod cancel;

mod source;
mod reddit_api;
mod pairs;
mod stats;
mod worker;
mod coordinator;

mod codec;
mod persist;

mod text;
mod language;
mod cleaning;
mod pipeline;

pub use crate::config::{
    normalize_collection, Compression, DatasetSplits, ExtractOptions, ProcessingConfig, QualityThresholds,
    RedditCredentials, RetryPolicy, Settings, TextProcessing, DEFAULT_COLLECTIONS, DEFAULT_EMPATHY_KEYWORDS,
};
pub use crate::error::{EtlError, Rejection};
pub use crate::model::{
    conversation_id, CandidatePair, CleanedMetadata, CleanedRecord, CommentRecord, ConversationMetadata,
    ConversationRecord, EmpathyPair, PairMetadata, RawComment, RawPost, DELETED_AUTHOR, UNSCORED,
};

// Extraction side.
pub use crate::cancel::CancelToken;
pub use crate::coordinator::Extractor;
pub use crate::pairs::{PairExtractor, MIN_KEYWORD_HITS, TOP_COMMENTS};
pub use crate::reddit_api::RedditApiReader;
pub use crate::source::SourceReader;
pub use crate::stats::{ExtractionStats, StatsRecorder};
pub use crate::worker::{
    build_conversation, extract_collection, filter_comments, precheck_post, CollectionResult, CollectionStatus,
    PostDecision, PostRejection,
};

// Batch files, checkpoints and summaries.
pub use crate::codec::{for_each_line, read_lines, write_records, NdjsonWriter};
pub use crate::persist::{
    batch_file_name, discover_batches, latest_checkpoint, write_batch, write_checkpoint, write_summary, Checkpoint,
    ConfigUsed, ExtractionSummary,
};

// Cleaning and the processing pipeline.
pub use crate::cleaning::{derive_clean_id, CleaningTally, DataCleaner, PairInput, PROMPT_KEYS, RESPONSE_KEYS};
pub use crate::language::{LanguageDetector, WhatlangDetector};
pub use crate::pipeline::{
    split_stats, Exporter, HashSplitter, PassThroughScorer, Pipeline, ProcessingReport, Scorer, SplitStats, Splitter,
    REPORT_FILE, SPLIT_NAMES, STAGE1_FILE, STAGE2_FILE,
};
pub use crate::text::{TextNormalizer, EMAIL_PATTERN, EMAIL_PLACEHOLDER, NAME_PLACEHOLDER, PHONE_PATTERN, PHONE_PLACEHOLDER, URL_PATTERN};

// Pool, progress and host helpers for binaries.
pub use crate::concurrency::WorkerPool;
pub use crate::mem::{available_memory_fraction, host_info, is_low_memory, HostInfo};
pub use crate::progress::make_count_progress;
pub use crate::util::{init_tracing_once, replace_file_atomic_backoff};
