use crate::harmonic::HarmonicPosition;
use crate::models::{SpectralProfile, Track};

use super::Result;

/// A track row as stored; JSON columns still encoded.
pub(crate) struct TrackRow {
    pub id: String,
    pub name: String,
    pub artists: String,
    pub bpm: f64,
    pub camelot_key: String,
    pub energy: f64,
    pub genre: Option<String>,
    pub duration_secs: Option<f64>,
    pub spectral: Option<String>,
}

impl TrackRow {
    pub const COLUMNS: &'static str =
        "id, name, artists, bpm, camelot_key, energy, genre, duration_secs, spectral";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            artists: row.get(2)?,
            bpm: row.get(3)?,
            camelot_key: row.get(4)?,
            energy: row.get(5)?,
            genre: row.get(6)?,
            duration_secs: row.get(7)?,
            spectral: row.get(8)?,
        })
    }

    /// Decode and re-validate; a row edited by hand can't smuggle in a bad key.
    pub fn into_track(self) -> Result<Track> {
        let key: HarmonicPosition = self.camelot_key.parse()?;
        let spectral: Option<SpectralProfile> = match self.spectral {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        let track = Track {
            id: self.id,
            name: self.name,
            artists: serde_json::from_str(&self.artists)?,
            bpm: self.bpm,
            key,
            energy: self.energy,
            genre: self.genre,
            duration: self.duration_secs,
            spectral,
        };
        track.validate()?;
        Ok(track)
    }
}

/// A library track with an audio file, plus what the store knows about its
/// last analysis.
#[derive(Debug, Clone)]
pub struct AnalysisTarget {
    pub track: Track,
    pub file_path: String,
    /// Fingerprint of the source at the last successful analysis.
    pub fingerprint: Option<String>,
}

#[derive(Debug, Default)]
pub struct LibraryStats {
    pub total_tracks: i64,
    pub with_audio: i64,
    pub analyzed_tracks: i64,
    pub with_genre: i64,
    pub with_spectral: i64,
    /// Camelot key → track count, most common first.
    pub keys: Vec<(String, i64)>,
    /// Normalized-ish genre → track count, top 20.
    pub genres: Vec<(String, i64)>,
}
