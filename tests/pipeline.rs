#[path = "common/mod.rs"]
mod common;

use common::*;
use empathy_etl::{
    read_lines, split_stats, write_batch, CleanedRecord, Compression, DatasetSplits, EmpathyPair, Exporter, Extractor,
    HashSplitter, PairMetadata, PassThroughScorer, Pipeline, ProcessingConfig, ProcessingReport, Scorer, Splitter,
    REPORT_FILE, STAGE1_FILE, STAGE2_FILE,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn processing(root: &Path) -> ProcessingConfig {
    ProcessingConfig::default()
        .with_dirs(root.join("raw"), root.join("processed"), root.join("temp"))
        .with_parallel_workers(2)
        .with_batch_size(3)
        .with_progress(false)
}

/// Conversations whose pairs both survive cleaning (score 50 clears the cleaning floor of 10).
fn extract_into(root: &Path, collections: &[&str], posts_each: usize) {
    let reader = collections.iter().fold(FakeReader::new(), |r, c| {
        let mut r = r.with_standard_collection(c, posts_each);
        for i in 0..posts_each {
            let id = format!("{c}_p{i}");
            r = r.with_comments(
                &id,
                vec![
                    comment(&format!("{id}_a"), SUPPORTIVE, 10, &format!("t3_{id}")),
                    comment(&format!("{id}_b"), SUPPORTIVE_2, 4, &format!("t3_{id}")),
                ],
            );
        }
        r
    });
    let opts = test_options(root).with_collections(collections.iter().copied()).with_batch_size(2);
    Extractor::from_options(opts).run(&reader).unwrap();
}

fn pair(score: f64) -> EmpathyPair {
    EmpathyPair {
        prompt: "p".repeat(20),
        response: "r".repeat(20),
        empathy_score: score,
        quality_score: score,
        pair_metadata: PairMetadata {
            original_input_length: 20,
            original_response_length: 20,
            cleaned_input_length: 20,
            cleaned_response_length: 20,
        },
    }
}

fn cleaned(id: &str, scores: &[f64]) -> CleanedRecord {
    CleanedRecord {
        conversation_id: id.to_string(),
        subreddit: "grief".into(),
        context: String::new(),
        post_title: String::new(),
        empathy_pairs: scores.iter().map(|s| pair(*s)).collect(),
        metadata: empathy_etl::CleanedMetadata {
            source_subreddit: "grief".into(),
            original_score: 10,
            original_comment_count: 2,
            extraction_timestamp: None,
            processing_timestamp: "2024-05-01T10:00:00Z".into(),
            quality_flags: vec![],
        },
    }
}

/// Extract, then process: every stage artifact and the report appear, and split sizes add up.
#[test]
fn end_to_end_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    extract_into(dir.path(), &["grief", "Anxiety", "offmychest"], 4);

    let cfg = processing(dir.path());
    let report = Pipeline::new(cfg.clone()).run().unwrap();

    assert_eq!(report.input_files, 2);
    assert!(report.skipped_files.is_empty());
    assert_eq!(report.raw_records, 12);
    assert_eq!(report.cleaning.accepted, 12);
    assert_eq!(report.scored_records, 12);

    assert_eq!(read_lines(&cfg.temp_dir.join(STAGE1_FILE)).unwrap().len(), 12);
    assert_eq!(read_lines(&cfg.temp_dir.join(STAGE2_FILE)).unwrap().len(), 12);

    let mut total = 0;
    for split in ["train", "validation", "test"] {
        let path = cfg.output_dir.join(format!("{split}_dataset.jsonl.gz"));
        let n = read_lines(&path).unwrap().len();
        assert_eq!(report.dataset_statistics[split].total_examples, n);
        // nothing is scored yet
        assert_eq!(report.dataset_statistics[split].scored_pairs, 0);
        total += n;
    }
    assert_eq!(total, 12);

    let on_disk: ProcessingReport =
        serde_json::from_str(&std::fs::read_to_string(cfg.output_dir.join(REPORT_FILE)).unwrap()).unwrap();
    assert_eq!(on_disk.cleaning, report.cleaning);
    assert_eq!(on_disk.dataset_statistics, report.dataset_statistics);
}

/// No batch files in the input directory is an error.
#[test]
fn missing_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("raw")).unwrap();
    let err = Pipeline::new(processing(dir.path())).run().unwrap_err();
    assert!(err.to_string().contains("no batch files"), "{err:#}");
}

/// An undecodable batch file is skipped and reported; the rest is processed.
#[test]
fn corrupt_batch_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    extract_into(dir.path(), &["grief"], 2);
    let bad = dir.path().join("raw").join("batch_099_20240101_000000.jsonl.gz");
    std::fs::write(&bad, b"definitely not gzip").unwrap();

    let report = Pipeline::new(processing(dir.path())).run().unwrap();
    assert_eq!(report.input_files, 2);
    assert_eq!(report.skipped_files, vec![bad]);
    assert_eq!(report.cleaning.accepted, 2);
}

/// The pass-through scorer keeps unscored pairs and drops scored pairs under the threshold.
#[test]
fn pass_through_scorer() {
    let s = PassThroughScorer { min_empathy_score: 0.4 };
    let kept = s.score(cleaned("a", &[-1.0, 0.3, 0.9])).unwrap();
    let scores: Vec<f64> = kept.empathy_pairs.iter().map(|p| p.empathy_score).collect();
    assert_eq!(scores, vec![-1.0, 0.9]);
    assert!(s.score(cleaned("b", &[0.1, 0.2])).is_none());
}

/// Hash splits are deterministic, cover every record once and roughly follow the ratios.
#[test]
fn hash_splitter_is_stable() {
    let splitter = HashSplitter { ratios: DatasetSplits::default() };
    let records: Vec<CleanedRecord> = (0..1000).map(|i| cleaned(&format!("clean_{i}"), &[-1.0])).collect();
    let a = splitter.split(records.clone());
    let b = splitter.split(records);
    let ids = |m: &BTreeMap<String, Vec<CleanedRecord>>, k: &str| -> Vec<String> {
        m[k].iter().map(|r| r.conversation_id.clone()).collect()
    };
    for k in ["train", "validation", "test"] {
        assert_eq!(ids(&a, k), ids(&b, k));
    }
    assert_eq!(a.values().map(Vec::len).sum::<usize>(), 1000);
    let train = a["train"].len();
    assert!((600..=800).contains(&train), "train={train}");
    assert!(!a["validation"].is_empty() && !a["test"].is_empty());
}

/// Score summary ignores unscored pairs and buckets the rest at 0.6 and 0.8.
#[test]
fn split_statistics() {
    let recs = vec![cleaned("a", &[0.9, 0.7, -1.0]), cleaned("b", &[0.5, 0.8])];
    let s = split_stats(&recs);
    assert_eq!(s.total_examples, 2);
    assert_eq!(s.scored_pairs, 4);
    assert!((s.avg_empathy_score - 0.725).abs() < 1e-9);
    assert_eq!((s.high_empathy_count, s.medium_empathy_count, s.low_empathy_count), (2, 1, 1));
    assert!(s.empathy_std > 0.0);
    assert_eq!(split_stats(&[]).avg_empathy_score, 0.0);
}

struct CountingExporter(Arc<AtomicUsize>);

impl Exporter for CountingExporter {
    fn name(&self) -> &str {
        "counting"
    }
    fn export(&self, datasets: &BTreeMap<String, Vec<CleanedRecord>>, _output_dir: &Path) -> anyhow::Result<()> {
        self.0.fetch_add(datasets.values().map(Vec::len).sum(), Ordering::SeqCst);
        Ok(())
    }
}

/// A plugged-in exporter sees every split record and is listed in the report.
#[test]
fn exporter_runs_after_splitting() {
    let dir = tempfile::tempdir().unwrap();
    extract_into(dir.path(), &["grief"], 3);
    let seen = Arc::new(AtomicUsize::new(0));
    let report = Pipeline::new(processing(dir.path()))
        .exporter(CountingExporter(seen.clone()))
        .run()
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(report.exports, vec!["counting"]);
}

/// Batches written with zstd clean the same way as gzip batches.
#[test]
fn zstd_input_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    extract_into(dir.path(), &["grief"], 2);
    let raw = dir.path().join("raw");
    let gz = empathy_etl::discover_batches(&raw).unwrap();
    let records: Vec<empathy_etl::ConversationRecord> =
        read_lines(&gz[0]).unwrap().iter().map(|l| serde_json::from_str(l).unwrap()).collect();
    std::fs::remove_file(&gz[0]).unwrap();
    write_batch(&raw, 7, &records, Compression::Zstd).unwrap();

    let report = Pipeline::new(processing(dir.path())).run().unwrap();
    assert_eq!(report.cleaning.accepted, 2);
}
