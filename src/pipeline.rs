//! Processing pipeline: load raw batches, clean, score, split, export, report.
//!
//! Scoring, splitting and model-format export are pluggable stages. The defaults keep the
//! pipeline runnable end to end: records pass through unscored and are split by a hash of
//! their id.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cleaning::{CleaningTally, DataCleaner};
use crate::codec::{read_lines, write_records};
use crate::concurrency::WorkerPool;
use crate::config::{Compression, DatasetSplits, ProcessingConfig};
use crate::language::LanguageDetector;
use crate::model::CleanedRecord;
use crate::persist::{discover_batches, write_json_atomic};
use crate::util::{init_tracing_once, now_rfc3339};

pub const STAGE1_FILE: &str = "stage1_cleaned.jsonl.gz";
pub const STAGE2_FILE: &str = "stage2_empathy_scored.jsonl.gz";
pub const REPORT_FILE: &str = "processing_report.json";
pub const SPLIT_NAMES: [&str; 3] = ["train", "validation", "test"];

/// Empathy scoring stage. Returning `None` drops the record.
pub trait Scorer: Send + Sync {
    fn score(&self, record: CleanedRecord) -> Option<CleanedRecord>;
}

/// Leaves unscored pairs untouched. Pairs that carry a score below `min_empathy_score`
/// are dropped, and so is a record left without pairs.
#[derive(Clone, Debug)]
pub struct PassThroughScorer {
    pub min_empathy_score: f64,
}

impl Scorer for PassThroughScorer {
    fn score(&self, mut record: CleanedRecord) -> Option<CleanedRecord> {
        record
            .empathy_pairs
            .retain(|p| !p.is_scored() || p.empathy_score >= self.min_empathy_score);
        (!record.empathy_pairs.is_empty()).then_some(record)
    }
}

/// Assigns records to named splits.
pub trait Splitter: Send + Sync {
    fn split(&self, records: Vec<CleanedRecord>) -> BTreeMap<String, Vec<CleanedRecord>>;
}

/// Deterministic split on md5(conversation_id): the same record always lands in the same split.
#[derive(Clone, Debug)]
pub struct HashSplitter {
    pub ratios: DatasetSplits,
}

impl HashSplitter {
    /// Position of an id in [0, 1).
    pub fn bucket(id: &str) -> f64 {
        let digest = md5::compute(id.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.0[..8]);
        (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn split_for(&self, id: &str) -> &'static str {
        let b = Self::bucket(id);
        if b < self.ratios.train {
            "train"
        } else if b < self.ratios.train + self.ratios.validation {
            "validation"
        } else {
            "test"
        }
    }
}

impl Splitter for HashSplitter {
    fn split(&self, records: Vec<CleanedRecord>) -> BTreeMap<String, Vec<CleanedRecord>> {
        let mut out: BTreeMap<String, Vec<CleanedRecord>> =
            SPLIT_NAMES.iter().map(|s| (s.to_string(), Vec::new())).collect();
        for r in records {
            let name = self.split_for(&r.conversation_id);
            out.entry(name.to_string()).or_default().push(r);
        }
        out
    }
}

/// Model-format export. No implementation ships with the crate.
pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;
    fn export(&self, datasets: &BTreeMap<String, Vec<CleanedRecord>>, output_dir: &Path) -> Result<()>;
}

/// Empathy-score summary for one split. Unscored pairs are not counted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitStats {
    pub total_examples: usize,
    pub scored_pairs: usize,
    pub avg_empathy_score: f64,
    pub empathy_std: f64,
    pub high_empathy_count: usize,
    pub medium_empathy_count: usize,
    pub low_empathy_count: usize,
}

pub fn split_stats(records: &[CleanedRecord]) -> SplitStats {
    let scores: Vec<f64> = records
        .iter()
        .flat_map(|r| r.empathy_pairs.iter())
        .filter(|p| p.is_scored())
        .map(|p| p.empathy_score)
        .collect();
    let n = scores.len();
    let (mean, std) = if n == 0 {
        (0.0, 0.0)
    } else {
        let mean = scores.iter().sum::<f64>() / n as f64;
        let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        (mean, var.sqrt())
    };
    SplitStats {
        total_examples: records.len(),
        scored_pairs: n,
        avg_empathy_score: mean,
        empathy_std: std,
        high_empathy_count: scores.iter().filter(|s| **s >= 0.8).count(),
        medium_empathy_count: scores.iter().filter(|s| (0.6..0.8).contains(*s)).count(),
        low_empathy_count: scores.iter().filter(|s| **s < 0.6).count(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub processing_timestamp: String,
    pub pipeline_config: ProcessingConfig,
    pub input_files: usize,
    pub skipped_files: Vec<PathBuf>,
    pub raw_records: usize,
    pub cleaning: CleaningTally,
    pub scored_records: usize,
    pub dataset_statistics: BTreeMap<String, SplitStats>,
    pub exports: Vec<String>,
}

pub struct Pipeline {
    config: ProcessingConfig,
    scorer: Box<dyn Scorer>,
    splitter: Box<dyn Splitter>,
    exporter: Option<Box<dyn Exporter>>,
    detector: Option<Arc<dyn LanguageDetector>>,
}

impl Pipeline {
    pub fn new(config: ProcessingConfig) -> Self {
        let scorer = PassThroughScorer { min_empathy_score: config.quality_thresholds.min_empathy_score };
        let splitter = HashSplitter { ratios: config.dataset_splits.clone() };
        Self { config, scorer: Box::new(scorer), splitter: Box::new(splitter), exporter: None, detector: None }
    }

    // -------- Builder methods --------
    pub fn scorer(mut self, s: impl Scorer + 'static) -> Self { self.scorer = Box::new(s); self }
    pub fn splitter(mut self, s: impl Splitter + 'static) -> Self { self.splitter = Box::new(s); self }
    pub fn exporter(mut self, e: impl Exporter + 'static) -> Self { self.exporter = Some(Box::new(e)); self }
    pub fn language_detector(mut self, d: Arc<dyn LanguageDetector>) -> Self { self.detector = Some(d); self }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Run every stage and write the report. Fails if the input directory holds no batch files.
    pub fn run(&self) -> Result<ProcessingReport> {
        init_tracing_once();
        self.config.validate()?;
        let cfg = &self.config;
        let started = Instant::now();
        fs::create_dir_all(&cfg.temp_dir).with_context(|| format!("create {}", cfg.temp_dir.display()))?;
        fs::create_dir_all(&cfg.output_dir).with_context(|| format!("create {}", cfg.output_dir.display()))?;

        let files = discover_batches(&cfg.input_dir)?;
        if files.is_empty() {
            bail!("no batch files found in {}", cfg.input_dir.display());
        }
        tracing::info!("found {} raw batch files", files.len());
        let (lines, skipped) = load_raw_lines(&files);
        tracing::info!("loaded {} raw conversations", lines.len());

        // stage 1: cleaning
        let mut cleaner = DataCleaner::new(cfg)?;
        if let Some(d) = &self.detector {
            cleaner = cleaner.with_detector(d.clone());
        }
        let pool = WorkerPool::new(cfg.parallel_workers, "clean")?;
        let (cleaned, tally) = cleaner.clean_all(&lines, cfg.batch_size, &pool, cfg.progress);
        drop(lines);
        tracing::info!(
            "stage 1 complete: {} clean conversations, {} rejected (structure={} pairs={} score={} length={} language={} no_pairs={} malformed={})",
            tally.accepted, tally.rejected(), tally.structure, tally.too_few_pairs, tally.low_score,
            tally.too_long, tally.language, tally.no_surviving_pairs, tally.malformed
        );
        write_records(&cfg.temp_dir.join(STAGE1_FILE), Compression::Gzip, &cleaned)?;

        // stage 2: scoring
        let scored: Vec<CleanedRecord> = cleaned.into_iter().filter_map(|r| self.scorer.score(r)).collect();
        tracing::info!("stage 2 complete: {} scored conversations", scored.len());
        write_records(&cfg.temp_dir.join(STAGE2_FILE), Compression::Gzip, &scored)?;
        let scored_records = scored.len();

        // stage 3: splits
        let datasets = self.splitter.split(scored);
        for (name, records) in &datasets {
            let path = cfg.output_dir.join(format!("{name}_dataset.jsonl.gz"));
            write_records(&path, Compression::Gzip, records)?;
            tracing::info!("saved {}: {} examples", name, records.len());
        }

        // stage 4: export
        let mut exports = Vec::new();
        if let Some(exporter) = &self.exporter {
            exporter
                .export(&datasets, &cfg.output_dir)
                .with_context(|| format!("export {}", exporter.name()))?;
            exports.push(exporter.name().to_string());
        }

        let report = ProcessingReport {
            processing_timestamp: now_rfc3339(),
            pipeline_config: cfg.clone(),
            input_files: files.len(),
            skipped_files: skipped,
            raw_records: (tally.accepted + tally.rejected()) as usize,
            cleaning: tally,
            scored_records,
            dataset_statistics: datasets.iter().map(|(k, v)| (k.clone(), split_stats(v))).collect(),
            exports,
        };
        let report_path = cfg.output_dir.join(REPORT_FILE);
        write_json_atomic(&report_path, &report)?;
        tracing::info!("processing report saved to {}", report_path.display());
        tracing::info!(
            "pipeline completed in {:.1?}: {} examples across {} splits",
            started.elapsed(),
            datasets.values().map(Vec::len).sum::<usize>(),
            datasets.len()
        );
        Ok(report)
    }
}

/// Read all batch files, skipping (and reporting) any that cannot be decoded.
fn load_raw_lines(files: &[PathBuf]) -> (Vec<String>, Vec<PathBuf>) {
    let mut lines = Vec::new();
    let mut skipped = Vec::new();
    for f in files {
        match read_lines(f) {
            Ok(mut l) => lines.append(&mut l),
            Err(e) => {
                tracing::error!("error loading {}: {:#}", f.display(), e);
                skipped.push(f.clone());
            }
        }
    }
    (lines, skipped)
}
