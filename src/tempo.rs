//! Genre-aware tempo tolerances.
//!
//! Four-on-the-floor genres are beatmatched tightly, breakbeat-tempo genres
//! get a few BPM of slack, and loosely quantized genres (hip hop, R&B) are
//! forgiving. Differences are strictly linear: 85 vs 170 BPM is not treated
//! as a half-time match.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::config::TempoConfig;
use crate::error::{check_tempo, InputError};

/// Fallback tolerance (± BPM) for genres missing from the table.
pub const DEFAULT_TOLERANCE: f64 = 3.0;

/// Built-in genre → ± BPM window. Keys are already normalized.
const TOLERANCES: &[(&str, f64)] = &[
    ("house", 1.5),
    ("deep house", 1.5),
    ("tech house", 1.5),
    ("progressive house", 1.5),
    ("afro house", 1.5),
    ("techno", 1.5),
    ("hard techno", 1.5),
    ("minimal", 1.5),
    ("trance", 1.5),
    ("psytrance", 1.5),
    ("disco", 2.0),
    ("nu disco", 2.0),
    ("electro", 2.0),
    ("breakbeat", 3.0),
    ("breaks", 3.0),
    ("drum and bass", 3.0),
    ("jungle", 3.0),
    ("dubstep", 3.0),
    ("garage", 3.0),
    ("uk garage", 3.0),
    ("uk bass", 3.0),
    ("grime", 3.0),
    ("pop", 4.0),
    ("synth pop", 4.0),
    ("reggaeton", 4.0),
    ("rock", 5.0),
    ("funk", 5.0),
    ("soul", 5.0),
    ("latin", 5.0),
    ("reggae", 6.0),
    ("dancehall", 6.0),
    ("downtempo", 6.0),
    ("trap", 6.0),
    ("ambient", 8.0),
    ("hip hop", 8.0),
    ("r and b", 8.0),
];

/// Spellings that normalize to a different canonical genre.
const ALIASES: &[(&str, &str)] = &[
    ("hiphop", "hip hop"),
    ("rap", "hip hop"),
    ("dnb", "drum and bass"),
    ("d and b", "drum and bass"),
    ("drum n bass", "drum and bass"),
    ("rnb", "r and b"),
    ("ukg", "uk garage"),
    ("synthpop", "synth pop"),
    ("nudisco", "nu disco"),
];

/// Lowercase, unify separators and `&`, collapse whitespace, resolve aliases.
pub fn normalize_genre(raw: &str) -> String {
    let lowered = raw.to_lowercase().replace('&', " and ");
    let spaced: String = lowered
        .chars()
        .map(|c| if matches!(c, '-' | '_' | '/' | '.') { ' ' } else { c })
        .collect();
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");

    ALIASES
        .iter()
        .find(|(alias, _)| *alias == collapsed)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(collapsed)
}

/// Tolerance lookup table: built-ins merged with deployment overrides.
#[derive(Debug, Clone)]
pub struct TempoPolicy {
    tolerances: HashMap<String, f64>,
    default_tolerance: f64,
}

impl Default for TempoPolicy {
    fn default() -> Self {
        Self {
            tolerances: TOLERANCES
                .iter()
                .map(|(genre, tol)| (genre.to_string(), *tol))
                .collect(),
            default_tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl TempoPolicy {
    /// Built-in table with the config's overrides applied. Non-positive
    /// overrides are skipped so every tolerance stays > 0.
    pub fn from_config(config: &TempoConfig) -> Self {
        let mut policy = Self::default();
        if config.default_tolerance.is_finite() && config.default_tolerance > 0.0 {
            policy.default_tolerance = config.default_tolerance;
        } else {
            log::warn!(
                "Ignoring invalid default tempo tolerance {}",
                config.default_tolerance
            );
        }
        for (genre, tol) in &config.tolerances {
            if tol.is_finite() && *tol > 0.0 {
                policy.tolerances.insert(normalize_genre(genre), *tol);
            } else {
                log::warn!("Ignoring invalid tempo tolerance {} for genre {:?}", tol, genre);
            }
        }
        policy
    }

    pub fn default_tolerance(&self) -> f64 {
        self.default_tolerance
    }

    /// Whether the genre has its own entry (after normalization).
    pub fn is_known(&self, genre: &str) -> bool {
        self.tolerances.contains_key(&normalize_genre(genre))
    }

    /// ± BPM window for a genre; unknown or missing genres get the default.
    pub fn tolerance(&self, genre: Option<&str>) -> f64 {
        genre
            .and_then(|g| self.tolerances.get(&normalize_genre(g)).copied())
            .unwrap_or(self.default_tolerance)
    }

    /// Window for a pair of tracks: the tighter of the known tolerances.
    pub fn pair_tolerance(&self, genre_a: Option<&str>, genre_b: Option<&str>) -> f64 {
        let known = |g: Option<&str>| {
            g.and_then(|g| self.tolerances.get(&normalize_genre(g)).copied())
        };
        match (known(genre_a), known(genre_b)) {
            (Some(a), Some(b)) => a.min(b),
            (Some(t), None) | (None, Some(t)) => t,
            (None, None) => self.default_tolerance,
        }
    }

    /// Largest tolerance any genre can produce; bounds a scan window.
    pub fn max_tolerance(&self) -> f64 {
        self.tolerances
            .values()
            .copied()
            .fold(self.default_tolerance, f64::max)
    }

    pub fn are_tempos_compatible(
        &self,
        bpm_a: f64,
        bpm_b: f64,
        genre: Option<&str>,
    ) -> Result<bool, InputError> {
        let a = check_tempo("bpm_a", bpm_a)?;
        let b = check_tempo("bpm_b", bpm_b)?;
        Ok((a - b).abs() <= self.tolerance(genre))
    }
}

static DEFAULT_POLICY: LazyLock<TempoPolicy> = LazyLock::new(TempoPolicy::default);

/// Tolerance from the built-in table.
pub fn tolerance(genre: &str) -> f64 {
    DEFAULT_POLICY.tolerance(Some(genre))
}

/// `|a - b| <= tolerance(genre)` against the built-in table.
pub fn are_tempos_compatible(bpm_a: f64, bpm_b: f64, genre: &str) -> Result<bool, InputError> {
    DEFAULT_POLICY.are_tempos_compatible(bpm_a, bpm_b, Some(genre))
}

/// Where a BPM delta sits inside a window: 1.0 at zero delta, 0.0 at or past the edge.
pub fn closeness(delta: f64, tolerance: f64) -> f64 {
    if tolerance <= 0.0 {
        return if delta == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - delta.abs() / tolerance).clamp(0.0, 1.0)
}
