#[path = "common/mod.rs"]
mod common;

use common::*;
use empathy_etl::{
    discover_batches, extract_collection, latest_checkpoint, read_lines, CancelToken, Compression, ConversationRecord,
    EtlError, Extractor, PairExtractor, StatsRecorder,
};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;

fn conversations_in(raw_dir: &Path) -> Vec<ConversationRecord> {
    discover_batches(raw_dir)
        .unwrap()
        .iter()
        .flat_map(|p| read_lines(p).unwrap())
        .map(|l| serde_json::from_str(&l).unwrap())
        .collect()
}

fn reader_with(collections: &[String], posts_each: usize) -> FakeReader {
    collections.iter().fold(FakeReader::new(), |r, c| r.with_standard_collection(c, posts_each))
}

/// N=7 collections in groups of G=3 produce ceil(7/3)=3 batch files, and their union equals
/// what each collection yields when extracted on its own.
#[test]
fn grouping_neither_drops_nor_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let collections = names("sub", 7);
    let reader = reader_with(&collections, 2);
    let opts = test_options(dir.path()).with_collections(&collections).with_batch_size(3);
    let raw_dir = opts.raw_dir.clone();

    let summary = Extractor::from_options(opts.clone()).run(&reader).unwrap();
    let batches = discover_batches(&raw_dir).unwrap();
    assert_eq!(batches.len(), 3);
    assert_eq!(summary.total_files, 3);
    assert_eq!(summary.output_files, batches);

    let grouped: BTreeSet<String> = conversations_in(&raw_dir).into_iter().map(|c| c.conversation_id).collect();

    let extractor = PairExtractor::new(&opts.empathy_keywords, opts.min_comment_length);
    let stats = StatsRecorder::new();
    let independent: BTreeSet<String> = collections
        .iter()
        .flat_map(|c| extract_collection(&reader, c, &opts, &extractor, &stats, &CancelToken::new()).conversations)
        .map(|c| c.conversation_id)
        .collect();
    assert_eq!(grouped.len(), 14);
    assert_eq!(grouped, independent);
}

/// Batch files follow `batch_<seq:03>_<yyyymmdd_hhmmss>.jsonl.gz` with sequence 1..=groups.
#[test]
fn batch_files_are_numbered_in_group_order() {
    let dir = tempfile::tempdir().unwrap();
    let collections = names("c", 4);
    let reader = reader_with(&collections, 1);
    let opts = test_options(dir.path()).with_collections(&collections).with_batch_size(1);
    Extractor::from_options(opts.clone()).run(&reader).unwrap();

    let re = Regex::new(r"^batch_(\d{3})_\d{8}_\d{6}\.jsonl\.gz$").unwrap();
    let batches = discover_batches(&opts.raw_dir).unwrap();
    let seqs: Vec<String> = batches
        .iter()
        .map(|p| {
            let name = p.file_name().unwrap().to_str().unwrap();
            re.captures(name).expect(name)[1].to_string()
        })
        .collect();
    assert_eq!(seqs, vec!["001", "002", "003", "004"]);
    // group k holds collection k
    for (i, b) in batches.iter().enumerate() {
        let convs: Vec<ConversationRecord> = read_lines(b).unwrap().iter().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert!(convs.iter().all(|c| c.subreddit == format!("c{i}")));
    }
    assert!(files_with_prefix(&opts.raw_dir, ".").is_empty(), "no staging files left behind");
}

/// A group whose collections yield nothing still gets its (empty) batch file.
#[test]
fn empty_group_still_writes_batch() {
    let dir = tempfile::tempdir().unwrap();
    let reader = FakeReader::new().with_standard_collection("full", 1).with_collection("empty", vec![]);
    let opts = test_options(dir.path()).with_collections(["full", "empty"]).with_batch_size(1);
    Extractor::from_options(opts.clone()).run(&reader).unwrap();
    let batches = discover_batches(&opts.raw_dir).unwrap();
    assert_eq!(batches.len(), 2);
    assert!(read_lines(&batches[1]).unwrap().is_empty());
}

/// With 7 groups and a checkpoint every 3 groups, exactly 2 checkpoints are written.
#[test]
fn checkpoints_every_three_groups() {
    let dir = tempfile::tempdir().unwrap();
    let collections = names("s", 7);
    let reader = reader_with(&collections, 1);
    let opts = test_options(dir.path()).with_collections(&collections).with_batch_size(1);
    assert_eq!(opts.checkpoint_every_groups, 3);
    Extractor::from_options(opts.clone()).run(&reader).unwrap();

    let cps = files_with_prefix(&opts.checkpoint_dir, "extraction_checkpoint_");
    assert_eq!(cps.len(), 2);
    let (_, latest) = latest_checkpoint(&opts.checkpoint_dir).unwrap().unwrap();
    assert_eq!(latest.completed_collections, names("s", 6));
    assert_eq!(latest.last_batch, Some(6));
    assert_eq!(latest.extraction_stats.total_posts_processed, 6);
    assert_eq!(latest.host.workers, 2);
}

/// Failed collections are logged and counted; the run continues with the rest.
#[test]
fn failed_collection_does_not_stop_run() {
    let dir = tempfile::tempdir().unwrap();
    let reader = FakeReader::new()
        .with_standard_collection("a", 2)
        .failing_collection("b")
        .with_standard_collection("c", 2);
    let opts = test_options(dir.path()).with_collections(["a", "b", "c"]).with_batch_size(2);
    let summary = Extractor::from_options(opts.clone()).run(&reader).unwrap();
    assert_eq!(summary.failed_collections, vec!["b"]);
    assert_eq!(summary.extraction_stats.subreddits_completed, 2);
    assert_eq!(summary.extraction_stats.subreddits_failed, 1);
    assert_eq!(conversations_in(&opts.raw_dir).len(), 4);
    assert_eq!(files_with_prefix(&opts.raw_dir, "extraction_summary_").len(), 1);
}

/// Duplicate and `r/`-prefixed names collapse to one extraction per collection.
#[test]
fn duplicate_collections_are_extracted_once() {
    let dir = tempfile::tempdir().unwrap();
    let reader = FakeReader::new().with_standard_collection("grief", 1);
    let opts = test_options(dir.path()).with_collections(["grief", "r/grief", "/r/grief"]);
    Extractor::from_options(opts).run(&reader).unwrap();
    assert_eq!(reader.listed(), vec!["grief"]);
}

/// An interrupt mid-run persists the in-flight group, writes a final checkpoint and
/// surfaces `Interrupted`; a resumed run skips completed collections and continues numbering.
#[test]
fn interrupt_then_resume() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancelToken::new();
    let collections = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let reader = reader_with(&collections, 3).cancel_on_post("b_p0", token.clone());
    let opts = test_options(dir.path()).with_collections(&collections).with_batch_size(1).with_parallel_workers(1);

    let err = Extractor::from_options(opts.clone()).cancel_token(token).run(&reader).unwrap_err();
    assert!(matches!(err.downcast_ref::<EtlError>(), Some(EtlError::Interrupted)));
    assert!(!reader.listed().contains(&"c".to_string()), "no new collection after the interrupt");
    assert_eq!(discover_batches(&opts.raw_dir).unwrap().len(), 2);

    let (_, cp) = latest_checkpoint(&opts.checkpoint_dir).unwrap().expect("final checkpoint");
    assert_eq!(cp.completed_collections, vec!["a"]);
    assert_eq!(cp.last_batch, Some(2));

    let resumed_reader = reader_with(&collections, 3);
    let summary = Extractor::from_options(opts.clone().with_resume(true)).run(&resumed_reader).unwrap();
    assert_eq!(resumed_reader.listed(), vec!["b", "c"]);
    let names: Vec<String> = summary
        .output_files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names[0].starts_with("batch_003_"), "{names:?}");
    assert!(names[1].starts_with("batch_004_"), "{names:?}");
    // stats carry over: a (3) + partial b (1) + b (3) + c (3)
    assert_eq!(summary.extraction_stats.total_posts_processed, 10);
}

/// Resume without any checkpoint starts from scratch.
#[test]
fn resume_without_checkpoint_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let reader = FakeReader::new().with_standard_collection("a", 1);
    let opts = test_options(dir.path()).with_collections(["a"]).with_resume(true);
    let summary = Extractor::from_options(opts).run(&reader).unwrap();
    assert_eq!(summary.total_files, 1);
    assert_eq!(reader.listed(), vec!["a"]);
}

/// An unwritable output location aborts with `Persistence` after checkpointing.
#[test]
fn persistence_failure_aborts_after_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("raw");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let reader = FakeReader::new().with_standard_collection("a", 1).with_standard_collection("b", 1);
    let opts = test_options(dir.path()).with_collections(["a", "b"]).with_batch_size(1);

    let err = Extractor::from_options(opts.clone()).run(&reader).unwrap_err();
    assert!(matches!(err.downcast_ref::<EtlError>(), Some(EtlError::Persistence { .. })), "{err:#}");
    assert_eq!(reader.listed(), vec!["a"], "the run stops at the failing group");
    assert_eq!(files_with_prefix(&opts.checkpoint_dir, "extraction_checkpoint_").len(), 1);
}

/// Invalid options are rejected before any fetch.
#[test]
fn invalid_options_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let reader = FakeReader::new();
    let opts = test_options(dir.path()).with_collections(Vec::<String>::new());
    let err = Extractor::from_options(opts).run(&reader).unwrap_err();
    assert!(matches!(err.downcast_ref::<EtlError>(), Some(EtlError::InvalidConfig(_))));
    assert!(reader.listed().is_empty());
}

/// zstd batches are readable through the same discovery and decoding path.
#[test]
fn zstd_batches_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let reader = FakeReader::new().with_standard_collection("a", 2);
    let opts = test_options(dir.path()).with_collections(["a"]).with_compression(Compression::Zstd);
    Extractor::from_options(opts.clone()).run(&reader).unwrap();
    let batches = discover_batches(&opts.raw_dir).unwrap();
    assert!(batches[0].to_string_lossy().ends_with(".jsonl.zst"));
    assert_eq!(conversations_in(&opts.raw_dir).len(), 2);
}
