//! Camelot wheel positions and the key compatibility table.
//!
//! The wheel has 12 slots, each in a minor (`A`) and a major (`B`) variant.
//! Compatibility is decided by a fixed priority list: same key, relative
//! major/minor, adjacent slot, energy boost (±7), parallel key, else none.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Minor or major variant of a wheel slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Minor,
    Major,
}

impl Mode {
    pub fn flipped(self) -> Self {
        match self {
            Mode::Minor => Mode::Major,
            Mode::Major => Mode::Minor,
        }
    }

    /// Camelot letter: `A` for minor, `B` for major.
    pub fn letter(self) -> char {
        match self {
            Mode::Minor => 'A',
            Mode::Major => 'B',
        }
    }
}

/// A validated slot on the Camelot wheel (1-12, minor or major).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HarmonicPosition {
    slot: u8,
    mode: Mode,
}

/// Number of distinct wheel positions (12 slots x 2 modes).
pub const WHEEL_POSITIONS: usize = 24;

impl HarmonicPosition {
    pub fn new(slot: u8, mode: Mode) -> Result<Self, InputError> {
        if (1..=12).contains(&slot) {
            Ok(Self { slot, mode })
        } else {
            Err(InputError::InvalidSlot(slot))
        }
    }

    pub fn slot(self) -> u8 {
        self.slot
    }

    pub fn mode(self) -> Mode {
        self.mode
    }

    /// Dense index in `0..24`, used for bucketing.
    pub fn index(self) -> usize {
        (self.slot as usize - 1) * 2 + usize::from(self.mode == Mode::Major)
    }

    pub fn from_index(index: usize) -> Option<Self> {
        if index >= WHEEL_POSITIONS {
            return None;
        }
        let slot = (index / 2) as u8 + 1;
        let mode = if index % 2 == 0 { Mode::Minor } else { Mode::Major };
        Some(Self { slot, mode })
    }

    /// All 24 positions in index order.
    pub fn all() -> impl Iterator<Item = HarmonicPosition> {
        (0..WHEEL_POSITIONS).filter_map(Self::from_index)
    }

    /// Move `steps` slots clockwise (negative = counter-clockwise), same mode.
    pub fn shifted(self, steps: i32) -> Self {
        let slot = (self.slot as i32 - 1 + steps).rem_euclid(12) as u8 + 1;
        Self { slot, mode: self.mode }
    }

    /// Same slot, opposite mode.
    pub fn relative(self) -> Self {
        Self { slot: self.slot, mode: self.mode.flipped() }
    }

    /// Same root note, opposite mode: minor `s` <-> major `s + 3`.
    pub fn parallel(self) -> Self {
        match self.mode {
            Mode::Minor => Self { mode: Mode::Major, ..self.shifted(3) },
            Mode::Major => Self { mode: Mode::Minor, ..self.shifted(-3) },
        }
    }

    /// Convert a pitch class (0 = C, 1 = C#, ... 11 = B) and mode into a wheel slot.
    pub fn from_pitch_class(pitch_class: u8, mode: Mode) -> Self {
        // Major keys step around the wheel by fifths starting from C = 8B.
        // A minor key shares the slot of its relative major (three semitones up).
        let root = match mode {
            Mode::Major => pitch_class % 12,
            Mode::Minor => (pitch_class + 3) % 12,
        };
        let slot = ((7 + root as u32 * 7) % 12) as u8 + 1;
        Self { slot, mode }
    }
}

impl fmt::Display for HarmonicPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("{}{}", self.slot, self.mode.letter()))
    }
}

static CAMELOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)(1[0-2]|0?[1-9])\s*([ab])$").unwrap());

static OPEN_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)(1[0-2]|0?[1-9])\s*([md])$").unwrap());

static MUSICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Ga-g])\s*([#♯b♭]?)\s*(m|M|(?i:min|minor|maj|major))?$").unwrap()
});

impl FromStr for HarmonicPosition {
    type Err = InputError;

    /// Accepts Camelot (`8A`), Open Key (`1m`) and musical notation (`Am`, `F# minor`).
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s = raw.trim();
        let invalid = || InputError::InvalidKeyNotation(raw.to_string());

        if let Some(caps) = CAMELOT_RE.captures(s) {
            let slot: u8 = caps[1].parse().map_err(|_| invalid())?;
            let mode = if caps[2].eq_ignore_ascii_case("a") { Mode::Minor } else { Mode::Major };
            return Self::new(slot, mode);
        }

        if let Some(caps) = OPEN_KEY_RE.captures(s) {
            let open: u8 = caps[1].parse().map_err(|_| invalid())?;
            let mode = if caps[2].eq_ignore_ascii_case("m") { Mode::Minor } else { Mode::Major };
            // Open Key 1 sits on Camelot 8.
            let slot = (open + 6) % 12 + 1;
            return Self::new(slot, mode);
        }

        if let Some(caps) = MUSICAL_RE.captures(s) {
            let natural = match caps[1].to_ascii_uppercase().as_str() {
                "C" => 0,
                "D" => 2,
                "E" => 4,
                "F" => 5,
                "G" => 7,
                "A" => 9,
                "B" => 11,
                _ => return Err(invalid()),
            };
            let pitch_class = match caps.get(2).map(|m| m.as_str()) {
                Some("#") | Some("♯") => (natural + 1) % 12,
                Some("b") | Some("♭") => (natural + 11) % 12,
                _ => natural,
            };
            let mode = match caps.get(3).map(|m| m.as_str()) {
                Some("m") => Mode::Minor,
                Some("M") | None => Mode::Major,
                Some(word) if word.to_ascii_lowercase().starts_with("min") => Mode::Minor,
                Some(_) => Mode::Major,
            };
            return Ok(Self::from_pitch_class(pitch_class, mode));
        }

        Err(invalid())
    }
}

impl TryFrom<String> for HarmonicPosition {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HarmonicPosition> for String {
    fn from(value: HarmonicPosition) -> Self {
        value.to_string()
    }
}

/// Compatibility tiers, in descending order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityTier {
    Same,
    Relative,
    Adjacent,
    EnergyBoost,
    Modal,
    Incompatible,
}

impl CompatibilityTier {
    pub fn score(self) -> u8 {
        match self {
            Self::Same => 100,
            Self::Relative => 90,
            Self::Adjacent => 80,
            Self::EnergyBoost => 70,
            Self::Modal => 60,
            Self::Incompatible => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Same => "same",
            Self::Relative => "relative",
            Self::Adjacent => "adjacent",
            Self::EnergyBoost => "energy_boost",
            Self::Modal => "modal",
            Self::Incompatible => "incompatible",
        }
    }

    /// Human-readable name used in score descriptions.
    pub fn label(self) -> &'static str {
        match self {
            Self::Same => "Same key",
            Self::Relative => "Relative major/minor",
            Self::Adjacent => "Adjacent key",
            Self::EnergyBoost => "Energy boost",
            Self::Modal => "Parallel key",
            Self::Incompatible => "Key clash",
        }
    }
}

impl fmt::Display for CompatibilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing two wheel positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityResult {
    pub a: HarmonicPosition,
    pub b: HarmonicPosition,
    pub tier: CompatibilityTier,
    pub score: u8,
    pub description: String,
}

/// Which optional tiers `compatible_set` (and pair search) should admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompatibleSetOptions {
    pub include_energy_boost: bool,
    pub include_modal: bool,
}

impl Default for CompatibleSetOptions {
    fn default() -> Self {
        Self {
            include_energy_boost: true,
            include_modal: true,
        }
    }
}

impl CompatibleSetOptions {
    pub fn allows(&self, tier: CompatibilityTier) -> bool {
        match tier {
            CompatibilityTier::Incompatible => false,
            CompatibilityTier::EnergyBoost => self.include_energy_boost,
            CompatibilityTier::Modal => self.include_modal,
            _ => true,
        }
    }
}

/// Classify a pair of positions. Total and symmetric.
pub fn tier(a: HarmonicPosition, b: HarmonicPosition) -> CompatibilityTier {
    if a == b {
        return CompatibilityTier::Same;
    }
    if a.slot == b.slot {
        return CompatibilityTier::Relative;
    }
    if a.mode == b.mode {
        let offset = (b.slot as i32 - a.slot as i32).rem_euclid(12);
        return match offset {
            1 | 11 => CompatibilityTier::Adjacent,
            5 | 7 => CompatibilityTier::EnergyBoost,
            _ => CompatibilityTier::Incompatible,
        };
    }
    if a.parallel() == b {
        return CompatibilityTier::Modal;
    }
    CompatibilityTier::Incompatible
}

pub fn compatible(a: HarmonicPosition, b: HarmonicPosition) -> CompatibilityResult {
    let tier = tier(a, b);
    CompatibilityResult {
        a,
        b,
        tier,
        score: tier.score(),
        description: format!("{} ({a} -> {b})", tier.label()),
    }
}

/// Every position reachable from `a` through an admitted tier, best tier first.
pub fn compatible_set(a: HarmonicPosition, options: CompatibleSetOptions) -> Vec<HarmonicPosition> {
    let mut out: Vec<(CompatibilityTier, HarmonicPosition)> = HarmonicPosition::all()
        .map(|b| (tier(a, b), b))
        .filter(|(t, _)| options.allows(*t))
        .collect();
    out.sort_by(|x, y| y.0.score().cmp(&x.0.score()).then(x.1.cmp(&y.1)));
    out.into_iter().map(|(_, b)| b).collect()
}
