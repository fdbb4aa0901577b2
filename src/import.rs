//! Library ingestion from a JSON export.
//!
//! Accepts either a bare array of entries or `{ "tracks": [...] }`. Each
//! entry is validated on its own so one bad row doesn't sink the import.
//! Energy arrives either normalized (`energy`, 0-1) or as a 1-10
//! `energy_level`; both become the canonical 0-1 value here.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::db::{Database, DbError};
use crate::error::InputError;
use crate::models::{energy_from_level, SpectralProfile, Track};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed library file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    pub bpm: f64,
    pub key: String,
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub energy_level: Option<f64>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub spectral: Option<SpectralProfile>,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LibraryFile {
    Bare(Vec<LibraryEntry>),
    Wrapped { tracks: Vec<LibraryEntry> },
}

impl LibraryEntry {
    /// Validated track plus its audio path, if any.
    pub fn into_track(self) -> Result<(Track, Option<String>), InputError> {
        let energy = match (self.energy, self.energy_level) {
            (Some(e), _) => e,
            (None, Some(level)) => energy_from_level(level)?,
            (None, None) => return Err(InputError::EmptyField { field: "energy" }),
        };
        let mut track = Track::new(
            self.id,
            self.name,
            self.artists,
            self.bpm,
            self.key.parse()?,
            energy,
        )?;
        if let Some(genre) = self.genre {
            track = track.with_genre(genre);
        }
        if let Some(d) = self.duration {
            track = track.with_duration(d)?;
        }
        if let Some(s) = self.spectral.filter(|s| !s.is_empty()) {
            track = track.with_spectral(s)?;
        }
        Ok((track, self.file_path))
    }
}

pub fn parse_library(contents: &str) -> Result<Vec<LibraryEntry>, serde_json::Error> {
    Ok(match serde_json::from_str(contents)? {
        LibraryFile::Bare(entries) => entries,
        LibraryFile::Wrapped { tracks } => tracks,
    })
}

#[derive(Debug, Default)]
pub struct ImportResult {
    pub imported: usize,
    /// (entry id, reason) for every rejected entry.
    pub rejected: Vec<(String, InputError)>,
}

/// Relative audio paths are resolved against the library file's directory.
fn resolve_path(base: Option<&Path>, raw: &str) -> String {
    let p = PathBuf::from(raw);
    let ext = p
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !crate::SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        log::warn!("{} is not a decodable format; analysis of it will fail", raw);
    }
    match base {
        Some(dir) if p.is_relative() => dir.join(p).to_string_lossy().into_owned(),
        _ => raw.to_string(),
    }
}

pub fn import_entries(
    db: &Database,
    entries: Vec<LibraryEntry>,
    base_dir: Option<&Path>,
) -> Result<ImportResult, ImportError> {
    let mut result = ImportResult::default();
    let tx = db.conn.unchecked_transaction().map_err(DbError::from)?;

    for entry in entries {
        let id = entry.id.clone();
        match entry.into_track() {
            Ok((track, file_path)) => {
                let path = file_path.map(|p| resolve_path(base_dir, &p));
                db.upsert_track(&track, path.as_deref())?;
                result.imported += 1;
            }
            Err(e) => {
                log::warn!("Skipping library entry {:?}: {}", id, e);
                result.rejected.push((id, e));
            }
        }
    }

    tx.commit().map_err(DbError::from)?;
    log::info!(
        "Imported {} tracks ({} rejected)",
        result.imported,
        result.rejected.len()
    );
    Ok(result)
}

/// Read a library JSON file and upsert every valid entry.
pub fn import_library(db: &Database, path: &Path) -> Result<ImportResult, ImportError> {
    let contents = std::fs::read_to_string(path)?;
    let entries = parse_library(&contents)?;
    import_entries(db, entries, path.parent())
}
