//! Composite compatibility scores for two tracks.
//!
//! Two weight tables: a sequential transition (one track mixes into the next)
//! and a simultaneous mashup (both play at once, so texture matters too).
//! Every total is the plain sum of its disclosed sub-scores.

pub mod notes;
pub mod spectral;

use std::fmt;

use serde::Serialize;

use crate::config::{AppConfig, ScoringConfig};
use crate::harmonic::{self, CompatibilityTier, CompatibleSetOptions};
use crate::models::{Track, TrackAnalysis};
use crate::tempo::{self, TempoPolicy};

/// Neutral fraction used when spectral descriptors are missing.
pub const NEUTRAL_SPECTRAL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    Transition,
    Mashup,
}

/// Max points per sub-score.
#[derive(Debug, Clone, Copy)]
struct Weights {
    harmonic: f64,
    tempo: f64,
    energy: f64,
    spectral: f64,
}

const TRANSITION_WEIGHTS: Weights = Weights {
    harmonic: 40.0,
    tempo: 40.0,
    energy: 20.0,
    spectral: 0.0,
};

const MASHUP_WEIGHTS: Weights = Weights {
    harmonic: 40.0,
    tempo: 30.0,
    energy: 15.0,
    spectral: 15.0,
};

impl ScoreKind {
    fn weights(self) -> Weights {
        match self {
            ScoreKind::Transition => TRANSITION_WEIGHTS,
            ScoreKind::Mashup => MASHUP_WEIGHTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SubScore {
    pub value: f64,
    pub max: f64,
}

impl SubScore {
    fn from_fraction(fraction: f64, max: f64) -> Self {
        Self {
            value: fraction.clamp(0.0, 1.0) * max,
            max,
        }
    }

    /// Value as a fraction of its max.
    pub fn ratio(&self) -> f64 {
        if self.max > 0.0 { self.value / self.max } else { 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        })
    }
}

/// Result of scoring two tracks. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeScore {
    pub kind: ScoreKind,
    pub tier: CompatibilityTier,
    pub harmonic: SubScore,
    pub tempo: SubScore,
    pub energy: SubScore,
    /// Only present for mashups.
    pub spectral: Option<SubScore>,
    pub total: f64,
    pub difficulty: Difficulty,
    pub description: String,
    pub notes: Vec<String>,
    pub bpm_delta: f64,
    pub tempo_tolerance: f64,
    pub energy_delta: f64,
    /// Set when a missing optional field forced a neutral fallback.
    pub approximate: bool,
}

pub type TransitionScore = CompositeScore;
pub type MashupScore = CompositeScore;

impl CompositeScore {
    /// Named sub-scores in display order; their values sum to `total`.
    pub fn sub_scores(&self) -> Vec<(&'static str, SubScore)> {
        let mut out = vec![
            ("harmonic", self.harmonic),
            ("tempo", self.tempo),
            ("energy", self.energy),
        ];
        if let Some(s) = self.spectral {
            out.push(("spectral", s));
        }
        out
    }
}

/// Caller-owned scoring context: tolerance table, tier options, thresholds.
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    tempo: TempoPolicy,
    keys: CompatibleSetOptions,
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(tempo: TempoPolicy, keys: CompatibleSetOptions, config: ScoringConfig) -> Self {
        Self { tempo, keys, config }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(
            TempoPolicy::from_config(&config.tempo),
            config.keys,
            config.scoring.clone(),
        )
    }

    pub fn tempo_policy(&self) -> &TempoPolicy {
        &self.tempo
    }

    pub fn key_options(&self) -> CompatibleSetOptions {
        self.keys
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn difficulty(&self, total: f64) -> Difficulty {
        if total >= self.config.easy_threshold {
            Difficulty::Easy
        } else if total >= self.config.medium_threshold {
            Difficulty::Medium
        } else {
            Difficulty::Hard
        }
    }

    pub fn score_transition(&self, a: &Track, b: &Track) -> TransitionScore {
        self.score(ScoreKind::Transition, a, b, None, None)
    }

    /// Transition score whose notes also draw on both tracks' structure.
    pub fn score_transition_with_analysis(
        &self,
        a: &Track,
        b: &Track,
        analysis_a: Option<&TrackAnalysis>,
        analysis_b: Option<&TrackAnalysis>,
    ) -> TransitionScore {
        self.score(ScoreKind::Transition, a, b, analysis_a, analysis_b)
    }

    pub fn score_mashup(&self, a: &Track, b: &Track) -> MashupScore {
        self.score(ScoreKind::Mashup, a, b, None, None)
    }

    fn score(
        &self,
        kind: ScoreKind,
        a: &Track,
        b: &Track,
        analysis_a: Option<&TrackAnalysis>,
        analysis_b: Option<&TrackAnalysis>,
    ) -> CompositeScore {
        let w = kind.weights();

        // ── Harmonic ──────────────────────────────────────────────────
        // Tier score (0-100) scaled onto the harmonic weight.
        let tier = harmonic::tier(a.key, b.key);
        let harmonic = SubScore::from_fraction(tier.score() as f64 / 100.0, w.harmonic);

        // ── Tempo ─────────────────────────────────────────────────────
        // Linear inside the genre window: 0 delta = full marks, edge = 0.
        let tolerance = self.tempo.pair_tolerance(a.genre.as_deref(), b.genre.as_deref());
        let bpm_delta = (a.bpm - b.bpm).abs();
        let tempo = SubScore::from_fraction(tempo::closeness(bpm_delta, tolerance), w.tempo);

        // ── Energy ────────────────────────────────────────────────────
        let energy_delta = (a.energy - b.energy).abs();
        let energy = SubScore::from_fraction(
            tempo::closeness(energy_delta, self.config.max_energy_delta),
            w.energy,
        );

        // ── Spectral (mashup only) ───────────────────────────────────
        // Missing descriptors contribute a neutral mid-score.
        let spectral_fraction = match kind {
            ScoreKind::Mashup => Some(
                spectral::similarity(a.spectral.as_ref(), b.spectral.as_ref())
                    .unwrap_or(NEUTRAL_SPECTRAL),
            ),
            ScoreKind::Transition => None,
        };
        let spectral = spectral_fraction.map(|f| SubScore::from_fraction(f, w.spectral));

        let total = (harmonic.value
            + tempo.value
            + energy.value
            + spectral.map(|s| s.value).unwrap_or(0.0))
        .clamp(0.0, 100.0);

        // Neither side has a table entry, so the default window applied.
        let unknown = |g: Option<&str>| !g.is_some_and(|g| self.tempo.is_known(g));
        let missing_genre = unknown(a.genre.as_deref()) && unknown(b.genre.as_deref());
        let missing_spectral = kind == ScoreKind::Mashup
            && spectral::similarity(a.spectral.as_ref(), b.spectral.as_ref()).is_none();
        let approximate = missing_genre || missing_spectral;

        let mut score = CompositeScore {
            kind,
            tier,
            harmonic,
            tempo,
            energy,
            spectral,
            total,
            difficulty: self.difficulty(total),
            description: String::new(),
            notes: Vec::new(),
            bpm_delta,
            tempo_tolerance: tolerance,
            energy_delta,
            approximate,
        };
        score.description = self.describe(&score);
        score.notes = notes::mixing_notes(
            &score,
            &notes::NoteContext {
                a,
                b,
                analysis_a,
                analysis_b,
                missing_genre,
                missing_spectral,
                weak_ratio: self.config.weak_ratio,
            },
        );
        score
    }

    fn describe(&self, score: &CompositeScore) -> String {
        let tight = |s: &SubScore| s.ratio() >= self.config.tight_ratio;
        let mut parts = vec![
            score.tier.label().to_string(),
            if tight(&score.tempo) { "tight tempo" } else { "loose tempo" }.to_string(),
            if tight(&score.energy) { "tight energy" } else { "loose energy" }.to_string(),
        ];
        if let Some(s) = &score.spectral {
            parts.push(if tight(s) { "similar texture" } else { "different texture" }.to_string());
        }
        let mut description = parts.join(", ");
        if score.approximate {
            description.push_str(" (approximate)");
        }
        description
    }
}
