use anyhow::Result;
use empathy_etl::{
    CancelToken, EtlError, Extractor, Pipeline, ProcessingConfig, RedditApiReader, RedditCredentials, Settings,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "./config/settings.json";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    empathy_etl::init_tracing_once();

    let settings_path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(SETTINGS_FILE));
    let settings = if Path::new(&settings_path).exists() {
        Settings::load(&settings_path)?
    } else {
        tracing::info!("no settings at {}; using defaults", settings_path.display());
        Settings::default()
    };

    let cancel = CancelToken::new();
    cancel.install_ctrlc_handler()?;

    let creds = RedditCredentials::from_env()?;
    let reader = RedditApiReader::new(creds, settings.extraction.retry.clone(), HTTP_TIMEOUT)?;
    reader.check_connection()?;

    let extractor = Extractor::from_options(settings.extraction.clone()).cancel_token(cancel.clone());
    match extractor.run(&reader) {
        Ok(summary) => println!(
            "Extracted {} conversations ({} empathy pairs) into {} batch files",
            summary.extraction_stats.total_posts_processed,
            summary.extraction_stats.empathy_pairs_found,
            summary.total_files
        ),
        Err(e) if matches!(e.downcast_ref::<EtlError>(), Some(EtlError::Interrupted)) => {
            println!("Interrupted; a final checkpoint was written. Re-run with resume enabled to continue.");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    let processing = ProcessingConfig {
        input_dir: settings.extraction.raw_dir.clone(),
        ..settings.processing
    };
    let report = Pipeline::new(processing).run()?;
    for (split, stats) in &report.dataset_statistics {
        println!("{split}: {} examples", stats.total_examples);
    }

    Ok(())
}
