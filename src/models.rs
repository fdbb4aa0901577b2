use serde::{Deserialize, Serialize};

use crate::error::{check_tempo, InputError};
use crate::harmonic::HarmonicPosition;

/// A library track as handed over by the import pipeline.
///
/// `energy` is always on the normalized 0.0-1.0 scale; sources that report a
/// 1-10 level convert with [`energy_from_level`] before building a `Track`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    pub bpm: f64,
    pub key: HarmonicPosition,
    pub energy: f64,
    #[serde(default)]
    pub genre: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub spectral: Option<SpectralProfile>,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        artists: Vec<String>,
        bpm: f64,
        key: HarmonicPosition,
        energy: f64,
    ) -> Result<Self, InputError> {
        let track = Self {
            id: id.into(),
            name: name.into(),
            artists,
            bpm,
            key,
            energy,
            genre: None,
            duration: None,
            spectral: None,
        };
        track.validate()?;
        Ok(track)
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        let genre = genre.into();
        self.genre = if genre.trim().is_empty() { None } else { Some(genre) };
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Result<Self, InputError> {
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(InputError::InvalidDuration { value: seconds });
        }
        self.duration = Some(seconds);
        Ok(self)
    }

    pub fn with_spectral(mut self, spectral: SpectralProfile) -> Result<Self, InputError> {
        spectral.validate()?;
        self.spectral = Some(spectral);
        Ok(self)
    }

    /// Check the invariants serde can't express. The key is already valid by
    /// construction.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.id.trim().is_empty() {
            return Err(InputError::EmptyField { field: "id" });
        }
        check_tempo("bpm", self.bpm)?;
        if !(self.energy.is_finite() && (0.0..=1.0).contains(&self.energy)) {
            return Err(InputError::InvalidEnergy { field: "energy", value: self.energy });
        }
        if let Some(d) = self.duration {
            if !(d.is_finite() && d > 0.0) {
                return Err(InputError::InvalidDuration { value: d });
            }
        }
        if let Some(s) = &self.spectral {
            s.validate()?;
        }
        Ok(())
    }

    pub fn artist_display(&self) -> String {
        self.artists.join(", ")
    }
}

/// Convert a 1-10 energy level to the canonical 0.0-1.0 scale.
pub fn energy_from_level(level: f64) -> Result<f64, InputError> {
    if level.is_finite() && (1.0..=10.0).contains(&level) {
        Ok((level - 1.0) / 9.0)
    } else {
        Err(InputError::InvalidEnergy { field: "energy_level", value: level })
    }
}

/// Continuous timbre descriptors, each in 0.0-1.0. Any may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralProfile {
    pub acousticness: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub speechiness: Option<f64>,
    pub danceability: Option<f64>,
    pub valence: Option<f64>,
}

impl SpectralProfile {
    pub fn descriptors(&self) -> [(&'static str, Option<f64>); 5] {
        [
            ("acousticness", self.acousticness),
            ("instrumentalness", self.instrumentalness),
            ("speechiness", self.speechiness),
            ("danceability", self.danceability),
            ("valence", self.valence),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors().iter().all(|(_, v)| v.is_none())
    }

    pub fn validate(&self) -> Result<(), InputError> {
        for (name, value) in self.descriptors() {
            if let Some(v) = value {
                if !(v.is_finite() && (0.0..=1.0).contains(&v)) {
                    return Err(InputError::InvalidDescriptor { name, value: v });
                }
            }
        }
        Ok(())
    }
}

/// Structural role of a region of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    Intro,
    Verse,
    Buildup,
    Drop,
    Breakdown,
    Outro,
    Unknown,
}

impl SegmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Verse => "verse",
            Self::Buildup => "buildup",
            Self::Drop => "drop",
            Self::Breakdown => "breakdown",
            Self::Outro => "outro",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentType,
    pub start: f64,
    pub end: f64,
    /// Mean of the normalized energy curve over the region.
    pub energy: f64,
    pub beat_count: usize,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Energy curve sampled at a fixed rate, independent of the audio rate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyEnvelope {
    /// Curve samples per second.
    pub sample_rate: f64,
    pub values: Vec<f64>,
}

impl EnergyEnvelope {
    pub fn time_at(&self, index: usize) -> f64 {
        index as f64 / self.sample_rate
    }

    /// Mean of the samples whose timestamps fall in `[start, end)`; falls back
    /// to the sample nearest the midpoint when the range holds none.
    pub fn mean_between(&self, start: f64, end: f64) -> f64 {
        if self.values.is_empty() || self.sample_rate <= 0.0 {
            return 0.0;
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for (i, v) in self.values.iter().enumerate() {
            let t = self.time_at(i);
            if t >= end {
                break;
            }
            if t >= start {
                sum += v;
                count += 1;
            }
        }
        if count > 0 {
            sum / count as f64
        } else {
            let mid = ((start + end) / 2.0 * self.sample_rate).round() as usize;
            self.values[mid.min(self.values.len() - 1)]
        }
    }
}

/// Durable per-track structure analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAnalysis {
    pub duration: f64,
    /// Tempo the beat grid was tracked at.
    pub tempo: f64,
    pub beats_per_bar: u32,
    pub beats: Vec<f64>,
    pub downbeats: Vec<f64>,
    pub energy_curve: EnergyEnvelope,
    pub segments: Vec<Segment>,
    pub mix_in_point: f64,
    pub mix_out_point: f64,
    pub drop_point: Option<f64>,
    pub breakdown_point: Option<f64>,
    pub ideal_crossfade_bars: u32,
}

impl TrackAnalysis {
    pub fn crossfade_seconds(&self) -> f64 {
        crossfade_seconds(self.ideal_crossfade_bars, self.tempo, self.beats_per_bar)
    }

    pub fn first_segment_of(&self, kind: SegmentType) -> Option<&Segment> {
        self.segments.iter().find(|s| s.kind == kind)
    }
}

/// Length in seconds of `bars` bars at `bpm`.
pub fn crossfade_seconds(bars: u32, bpm: f64, beats_per_bar: u32) -> f64 {
    if bpm <= 0.0 {
        return 0.0;
    }
    bars as f64 * beats_per_bar as f64 * 60.0 / bpm
}

/// Format seconds as `m:ss`.
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> HarmonicPosition {
        "8A".parse().unwrap()
    }

    #[test]
    fn track_validation() {
        assert!(Track::new("t1", "Song", vec![], 128.0, key(), 0.5).is_ok());
        assert_eq!(
            Track::new("", "Song", vec![], 128.0, key(), 0.5),
            Err(InputError::EmptyField { field: "id" })
        );
        assert!(matches!(
            Track::new("t1", "Song", vec![], -1.0, key(), 0.5),
            Err(InputError::InvalidTempo { .. })
        ));
        assert!(matches!(
            Track::new("t1", "Song", vec![], 120.0, key(), 7.0),
            Err(InputError::InvalidEnergy { .. })
        ));
    }

    #[test]
    fn builder_validates_optional_fields() {
        let t = Track::new("t1", "Song", vec!["A".into(), "B".into()], 128.0, key(), 0.5).unwrap();
        assert_eq!(t.artist_display(), "A, B");
        assert!(t.clone().with_duration(0.0).is_err());
        let bad = SpectralProfile { valence: Some(1.5), ..Default::default() };
        assert!(matches!(
            t.clone().with_spectral(bad),
            Err(InputError::InvalidDescriptor { name: "valence", .. })
        ));
        assert_eq!(t.with_genre("  ").genre, None);
    }

    #[test]
    fn energy_level_conversion() {
        assert_eq!(energy_from_level(1.0).unwrap(), 0.0);
        assert_eq!(energy_from_level(10.0).unwrap(), 1.0);
        assert!((energy_from_level(5.5).unwrap() - 0.5).abs() < 1e-12);
        assert!(energy_from_level(0.0).is_err());
        assert!(energy_from_level(11.0).is_err());
    }

    #[test]
    fn crossfade_length() {
        // 16 bars of 4/4 at 120 BPM = 32 seconds
        assert_eq!(crossfade_seconds(16, 120.0, 4), 32.0);
        assert_eq!(crossfade_seconds(8, 0.0, 4), 0.0);
    }

    #[test]
    fn envelope_mean() {
        let env = EnergyEnvelope { sample_rate: 2.0, values: vec![0.0, 1.0, 1.0, 0.0] };
        assert_eq!(env.mean_between(0.5, 1.5), 1.0);
        assert_eq!(env.mean_between(0.0, 2.0), 0.5);
        // no sample inside [0.1, 0.2); nearest to the midpoint is index 0
        assert_eq!(env.mean_between(0.1, 0.2), 0.0);
    }

    #[test]
    fn track_deserializes_with_defaults() {
        let json = r#"{"id":"x","name":"Song","bpm":124.0,"key":"Am","energy":0.4}"#;
        let t: Track = serde_json::from_str(json).unwrap();
        assert_eq!(t.key, key());
        assert!(t.artists.is_empty());
        assert!(t.genre.is_none());
        assert!(t.validate().is_ok());
    }

    #[test]
    fn time_formatting() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(125.4), "2:05");
    }
}
