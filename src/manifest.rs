//! Training manifest parsing.
//!
//! A manifest is a headerless CSV file where each row describes one
//! utterance:
//!
//! ```text
//! /data/an4/wav/cen1-fash-b.wav,/data/an4/txt/cen1-fash-b.txt,2.885
//! ```
//!
//! The third column is the utterance duration in seconds. It is the length
//! metric the bucketing samplers sort by, so a row with a missing,
//! non-numeric, non-finite or negative duration is a fatal configuration
//! error at parse time rather than something to paper over later.

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One row of a training or validation manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// Path to the audio file for this utterance.
    pub audio_path: PathBuf,
    /// Path to the transcript file for this utterance.
    pub transcript_path: PathBuf,
    /// Utterance duration in seconds. Used only for length bucketing.
    pub duration_secs: f32,
}

/// Reads and validates a manifest file.
///
/// Returns the entries in file order. Every duration is checked up front;
/// the first invalid row aborts the whole read with its row number.
pub fn read_manifest(path: impl AsRef<Path>) -> Result<Vec<ManifestEntry>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to open manifest {}", path.display()))?;

    let mut entries = Vec::new();
    for (row, record) in reader.deserialize::<ManifestEntry>().enumerate() {
        let entry = record
            .with_context(|| format!("Malformed manifest row {} in {}", row, path.display()))?;
        ensure!(
            entry.duration_secs.is_finite() && entry.duration_secs >= 0.0,
            "Manifest row {} in {} has invalid duration {}",
            row,
            path.display(),
            entry.duration_secs,
        );
        entries.push(entry);
    }
    Ok(entries)
}
