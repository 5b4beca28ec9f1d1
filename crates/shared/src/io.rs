use chrono::NaiveDate;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::models::AudioFormat;

const MARKER_FILE: &str = ".wsws-bulletin-write-check";

fn file_stem(date: NaiveDate) -> String {
    format!("bulletin_{}", date.format("%Y-%m-%d"))
}

/// Text document path for `date`. One per calendar day.
pub fn bulletin_path(output_dir: &Path, date: NaiveDate) -> PathBuf {
    output_dir.join(format!("{}.md", file_stem(date)))
}

/// Audio path for `date`; the extension follows the backend's format.
pub fn audio_path(output_dir: &Path, date: NaiveDate, format: AudioFormat) -> PathBuf {
    output_dir.join(format!("{}.{}", file_stem(date), format.extension()))
}

pub fn ensure_output_dir(output_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(output_dir)
}

/// Write via a sibling temp file and rename, so readers never see a partial file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".wsws-bulletin-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create and remove a marker file to prove the directory accepts writes.
pub fn check_writable(output_dir: &Path) -> io::Result<()> {
    ensure_output_dir(output_dir)?;
    let marker = output_dir.join(MARKER_FILE);
    fs::write(&marker, b"ok")?;
    fs::remove_file(&marker)
}
