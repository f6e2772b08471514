//! Compressed NDJSON: gzip (default) or zstd, one JSON record per line.
//!
//! Writers stage into `<name>.inprogress` next to the target and promote atomically on
//! `finish()`, so a reader never sees a truncated file.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;

use crate::config::Compression;
use crate::util::{create_with_backoff, open_with_backoff, remove_with_backoff, replace_file_atomic_backoff};

const WRITE_BUF: usize = 256 * 1024;
const READ_BUF: usize = 256 * 1024;
const ZSTD_LEVEL: i32 = 3;

enum Sink {
    Gzip(GzEncoder<BufWriter<File>>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

impl Sink {
    fn as_write(&mut self) -> &mut dyn Write {
        match self {
            Sink::Gzip(w) => w,
            Sink::Zstd(w) => w,
        }
    }

    fn finish(self) -> io::Result<File> {
        let buffered = match self {
            Sink::Gzip(w) => w.finish()?,
            Sink::Zstd(w) => w.finish()?,
        };
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(file)
    }
}

pub struct NdjsonWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    sink: Option<Sink>,
    lines: u64,
}

impl NdjsonWriter {
    pub fn create(final_path: &Path, compression: Compression) -> Result<Self> {
        let name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("invalid output path {}", final_path.display()))?;
        let tmp_path = final_path.with_file_name(format!(".{name}.inprogress"));
        let f = create_with_backoff(&tmp_path, 16, 50).with_context(|| format!("create {}", tmp_path.display()))?;
        let buffered = BufWriter::with_capacity(WRITE_BUF, f);
        let sink = match compression {
            Compression::Gzip => Sink::Gzip(GzEncoder::new(buffered, flate2::Compression::default())),
            Compression::Zstd => Sink::Zstd(
                zstd::stream::write::Encoder::new(buffered, ZSTD_LEVEL)
                    .with_context(|| format!("zstd encoder for {}", tmp_path.display()))?,
            ),
        };
        Ok(Self { tmp_path, final_path: final_path.to_path_buf(), sink: Some(sink), lines: 0 })
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let sink = self.sink.as_mut().ok_or_else(|| anyhow!("writer already finished"))?;
        let w = sink.as_write();
        serde_json::to_writer(&mut *w, record)?;
        w.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    /// Flush, close and promote to the final path.
    pub fn finish(mut self) -> Result<PathBuf> {
        let promoted = match self.sink.take() {
            Some(sink) => sink
                .finish()
                .with_context(|| format!("finish {}", self.tmp_path.display()))
                .and_then(|_| replace_file_atomic_backoff(&self.tmp_path, &self.final_path)),
            None => Err(anyhow!("writer already finished")),
        };
        if promoted.is_err() {
            let _ = remove_with_backoff(&self.tmp_path, 4, 25);
        }
        promoted.map(|_| self.final_path.clone())
    }
}

impl Drop for NdjsonWriter {
    fn drop(&mut self) {
        // unfinished writer: discard the staging file
        if self.sink.take().is_some() {
            let _ = remove_with_backoff(&self.tmp_path, 4, 25);
        }
    }
}

/// Write all `records` to `path` in one go.
pub fn write_records<'a, T, I>(path: &Path, compression: Compression, records: I) -> Result<u64>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut w = NdjsonWriter::create(path, compression)?;
    for r in records {
        w.write_record(r)?;
    }
    let n = w.lines_written();
    w.finish()?;
    Ok(n)
}

fn open_decoded(path: &Path) -> Result<Box<dyn Read>> {
    let file = open_with_backoff(path, 16, 50).with_context(|| format!("open {}", path.display()))?;
    Ok(match Compression::from_path(path) {
        Some(Compression::Gzip) => Box::new(MultiGzDecoder::new(file)),
        Some(Compression::Zstd) => Box::new(zstd::stream::read::Decoder::new(file)?),
        None => Box::new(file),
    })
}

/// Stream non-empty lines of a (possibly compressed) NDJSON file.
pub fn for_each_line(path: &Path, mut on_line: impl FnMut(&str) -> Result<()>) -> Result<()> {
    let mut reader = BufReader::with_capacity(READ_BUF, open_decoded(path)?);
    let mut buf = String::with_capacity(16 * 1024);
    loop {
        buf.clear();
        let n = reader.read_line(&mut buf).with_context(|| format!("decode {}", path.display()))?;
        if n == 0 {
            break;
        }
        let line = buf.trim_end_matches(|c: char| c == '\n' || c == '\r');
        if line.trim().is_empty() {
            continue;
        }
        on_line(line)?;
    }
    Ok(())
}

/// Collect all non-empty lines of a (possibly compressed) NDJSON file.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for_each_line(path, |l| {
        out.push(l.to_string());
        Ok(())
    })?;
    Ok(out)
}
