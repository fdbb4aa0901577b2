use std::collections::HashMap;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::harmonic::CompatibleSetOptions;
use crate::tempo::{normalize_genre, DEFAULT_TOLERANCE};

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    pub tempo: TempoConfig,
    pub keys: CompatibleSetOptions,
    pub scoring: ScoringConfig,
    pub analysis: AnalysisConfig,
    pub crossfade: CrossfadeConfig,
}

/// Genre → tempo tolerance overrides, merged over the built-in table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub default_tolerance: f64,
    pub tolerances: HashMap<String, f64>,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            default_tolerance: DEFAULT_TOLERANCE,
            tolerances: HashMap::new(),
        }
    }
}

/// Score thresholds and note triggers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Total at or above this is "easy".
    pub easy_threshold: f64,
    /// Total at or above this (and below easy) is "medium".
    pub medium_threshold: f64,
    /// Energy delta (0-1 scale) at which the energy sub-score reaches zero.
    pub max_energy_delta: f64,
    /// Fraction of a sub-score's max that counts as a "tight" match.
    pub tight_ratio: f64,
    /// Below this fraction of its max a sub-score gets a mixing note.
    pub weak_ratio: f64,
    /// Floor for `find_best_partner`.
    pub min_partner_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            easy_threshold: 85.0,
            medium_threshold: 70.0,
            max_energy_delta: 0.5,
            tight_ratio: 0.75,
            weak_ratio: 0.6,
            min_partner_score: 60.0,
        }
    }
}

/// Crossfade length defaults and their overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrossfadeConfig {
    pub default_bars: u32,
    /// Used when the track ends in a clean outro.
    pub outro_bars: u32,
    /// Used when the track has a high-energy drop; wins over `outro_bars`.
    pub drop_bars: u32,
}

impl Default for CrossfadeConfig {
    fn default() -> Self {
        Self {
            default_bars: 16,
            outro_bars: 32,
            drop_bars: 8,
        }
    }
}

/// Envelope, beat tracking and segmentation parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Energy curve samples per second.
    pub energy_sample_rate: f64,
    /// Hop of the onset-strength envelope, seconds.
    pub onset_hop_secs: f64,
    /// RMS window for genres without a template.
    pub default_window_secs: f64,
    pub beats_per_bar: u32,
    /// Segmentation window length in bars.
    pub window_bars: u32,
    pub buildup_multiplier: f64,
    pub drop_multiplier: f64,
    pub breakdown_ratio: f64,
    /// A window is "high" at or above `high_factor` × track mean.
    pub high_factor: f64,
    /// A window is "low" below `low_factor` × track mean.
    pub low_factor: f64,
    /// Windows in the rolling average.
    pub rolling_windows: usize,
    /// Drop segments at or above this normalized energy shorten the crossfade.
    pub drop_energy_threshold: f64,
    /// Minimum onset autocorrelation at the beat period.
    pub min_periodicity: f64,
    /// Tempo search range when no prior is supplied.
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Per-genre overrides of the built-in templates.
    pub genres: HashMap<String, GenreOverride>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            energy_sample_rate: 10.0,
            onset_hop_secs: 0.01,
            default_window_secs: 3.0,
            beats_per_bar: 4,
            window_bars: 4,
            buildup_multiplier: 1.15,
            drop_multiplier: 1.3,
            breakdown_ratio: 0.7,
            high_factor: 1.25,
            low_factor: 0.6,
            rolling_windows: 4,
            drop_energy_threshold: 0.8,
            min_periodicity: 0.1,
            min_bpm: 60.0,
            max_bpm: 180.0,
            genres: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenreOverride {
    pub window_secs: Option<f64>,
    pub drop_multiplier: Option<f64>,
}

/// Effective envelope window and drop multiplier for one genre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenreProfile {
    pub window_secs: f64,
    pub drop_multiplier: f64,
}

/// Built-in genre templates: (genre, RMS window seconds, drop multiplier).
/// Percussive genres get tight windows; ambient material is smoothed wider.
const GENRE_TEMPLATES: &[(&str, f64, f64)] = &[
    ("house", 2.0, 1.3),
    ("deep house", 2.0, 1.25),
    ("tech house", 2.0, 1.3),
    ("techno", 2.0, 1.3),
    ("trance", 2.0, 1.35),
    ("drum and bass", 2.0, 1.4),
    ("dubstep", 2.0, 1.5),
    ("breakbeat", 2.0, 1.35),
    ("hip hop", 3.0, 1.2),
    ("pop", 3.0, 1.25),
    ("downtempo", 5.0, 1.3),
    ("ambient", 6.0, 1.5),
];

impl AnalysisConfig {
    pub fn profile_for(&self, genre: Option<&str>) -> GenreProfile {
        let key = genre.map(normalize_genre);
        let mut profile = key
            .as_deref()
            .and_then(|g| GENRE_TEMPLATES.iter().find(|(name, _, _)| *name == g))
            .map(|(_, window_secs, drop_multiplier)| GenreProfile {
                window_secs: *window_secs,
                drop_multiplier: *drop_multiplier,
            })
            .unwrap_or(GenreProfile {
                window_secs: self.default_window_secs,
                drop_multiplier: self.drop_multiplier,
            });

        if let Some(g) = key.as_deref() {
            let over = self
                .genres
                .iter()
                .find(|(name, _)| normalize_genre(name) == g)
                .map(|(_, o)| o);
            if let Some(o) = over {
                if let Some(w) = o.window_secs.filter(|w| *w > 0.0) {
                    profile.window_secs = w;
                }
                if let Some(m) = o.drop_multiplier.filter(|m| *m > 0.0) {
                    profile.drop_multiplier = m;
                }
            }
        }
        profile
    }
}

impl AppConfig {
    /// Load config from `~/.config/mixwheel/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }),
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        let config: AppConfig = toml::from_str(contents)?;
        log::info!("Loaded config ({} tempo overrides)", config.tempo.tolerances.len());
        Ok(config)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("mixwheel.db")
    } else {
        PathBuf::from("mixwheel.db")
    }
}
