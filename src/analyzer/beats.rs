//! Tempo estimation and phase-tracking beat detection on an onset envelope.
//!
//! The tracker starts from the best-aligned phase of the nominal period and
//! then walks forward beat by beat, snapping each prediction to the
//! strongest nearby onset. The period follows the snapped intervals slowly
//! so gradual drift is tracked without jumping to off-beat hits.

use super::envelope::OnsetEnvelope;

/// Search window around each predicted beat, as a fraction of the period.
const SEARCH_FRACTION: f64 = 0.1;
/// An onset must exceed this multiple of the mean onset to move a beat.
const SNAP_THRESHOLD: f64 = 1.5;
/// Share of each observed interval folded into the running period.
const PERIOD_SMOOTHING: f64 = 0.2;
/// The running period stays within this fraction of the starting period.
const MAX_DRIFT: f64 = 0.08;
/// Beats from the start used to pick the initial phase.
const PHASE_BEATS: usize = 16;
/// Octave spread of the tempo preference curve around 120 BPM.
const TEMPO_PREFERENCE_OCTAVES: f64 = 1.0;
const PREFERRED_BPM: f64 = 120.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BeatGrid {
    /// Mean tempo of the tracked beats.
    pub tempo: f64,
    pub beats: Vec<f64>,
    pub downbeats: Vec<f64>,
}

fn centered(onset: &[f64]) -> Vec<f64> {
    if onset.is_empty() {
        return Vec::new();
    }
    let mean = onset.iter().sum::<f64>() / onset.len() as f64;
    onset.iter().map(|v| v - mean).collect()
}

fn autocorrelation(signal: &[f64], lag: usize) -> f64 {
    if lag >= signal.len() {
        return 0.0;
    }
    signal.iter().zip(&signal[lag..]).map(|(a, b)| a * b).sum()
}

fn period_frames(env: &OnsetEnvelope, bpm: f64) -> f64 {
    60.0 / (bpm * env.hop_secs)
}

/// Normalized autocorrelation of the onset envelope at the beat period,
/// best of the three nearest integer lags. 1.0 is perfectly periodic.
pub fn periodicity(env: &OnsetEnvelope, bpm: f64) -> f64 {
    let signal = centered(&env.onset);
    let energy = autocorrelation(&signal, 0);
    if energy <= 0.0 {
        return 0.0;
    }
    let lag = period_frames(env, bpm).round() as usize;
    [lag.saturating_sub(1), lag, lag.saturating_add(1)]
        .iter()
        .filter(|&&l| l > 0 && l < signal.len())
        .map(|&l| autocorrelation(&signal, l) / energy)
        .fold(0.0, f64::max)
}

/// Tempo from the autocorrelation of the onset envelope, weighted towards
/// 120 BPM so a half- or double-speed lag only wins when clearly stronger.
pub fn estimate_tempo(env: &OnsetEnvelope, min_bpm: f64, max_bpm: f64) -> Option<f64> {
    let signal = centered(&env.onset);
    if autocorrelation(&signal, 0) <= 0.0 || min_bpm <= 0.0 || max_bpm <= min_bpm {
        return None;
    }
    let min_lag = (period_frames(env, max_bpm).floor() as usize).max(1);
    let max_lag = (period_frames(env, min_bpm).ceil() as usize).min(signal.len().saturating_sub(2));
    if max_lag <= min_lag {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for lag in min_lag..=max_lag {
        let ac = autocorrelation(&signal, lag);
        if ac <= 0.0 {
            continue;
        }
        let bpm = 60.0 / (lag as f64 * env.hop_secs);
        let octaves = (bpm / PREFERRED_BPM).log2() / TEMPO_PREFERENCE_OCTAVES;
        let weighted = ac * (-0.5 * octaves * octaves).exp();
        if best.is_none_or(|(_, w)| weighted > w) {
            best = Some((lag, weighted));
        }
    }
    let (lag, _) = best?;

    // Parabolic interpolation for a fractional lag.
    let y0 = autocorrelation(&signal, lag - 1);
    let y1 = autocorrelation(&signal, lag);
    let y2 = autocorrelation(&signal, lag + 1);
    let denom = y0 - 2.0 * y1 + y2;
    let offset = if denom < 0.0 {
        (0.5 * (y0 - y2) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    let bpm = 60.0 / ((lag as f64 + offset) * env.hop_secs);
    log::debug!("Estimated tempo {:.2} BPM (lag {} + {:.2})", bpm, lag, offset);
    Some(bpm.clamp(min_bpm, max_bpm))
}

/// Strongest onset within `radius` frames of `predicted`, distance-weighted.
fn snap(onset: &[f64], predicted: f64, radius: i64) -> Option<usize> {
    if onset.is_empty() {
        return None;
    }
    let sigma = (radius as f64 / 2.0).max(0.5);
    let center = predicted.round() as i64;
    let lo = center.saturating_sub(radius).max(0);
    let hi = center.saturating_add(radius).min(onset.len() as i64 - 1);
    let mut best: Option<(usize, f64)> = None;
    for f in lo..=hi {
        let d = (f as f64 - predicted) / sigma;
        let score = onset[f as usize] * (-0.5 * d * d).exp();
        if score > 0.0 && best.is_none_or(|(_, s)| score > s) {
            best = Some((f as usize, score));
        }
    }
    best.map(|(f, _)| f)
}

/// Beat positions in frames.
pub fn track_beat_frames(env: &OnsetEnvelope, bpm: f64) -> Vec<f64> {
    let onset = &env.onset;
    let n = onset.len();
    let base_period = period_frames(env, bpm);
    if n == 0 || !base_period.is_finite() || base_period < 1.0 {
        return Vec::new();
    }

    let threshold = SNAP_THRESHOLD * env.mean_onset();
    let min_period = base_period * (1.0 - MAX_DRIFT);
    let max_period = base_period * (1.0 + MAX_DRIFT);
    let radius = |period: f64| (SEARCH_FRACTION * period).round().max(1.0) as i64;

    // Phase whose first few predicted beats land nearest the strongest onsets.
    let mut phase = 0usize;
    let mut phase_score = f64::MIN;
    for candidate in 0..(base_period.ceil() as usize).min(n) {
        let score: f64 = (0..PHASE_BEATS)
            .map(|k| candidate as f64 + k as f64 * base_period)
            .take_while(|&p| p <= (n - 1) as f64)
            .filter_map(|p| snap(onset, p, radius(base_period)))
            .map(|f| onset[f])
            .sum();
        if score > phase_score {
            phase_score = score;
            phase = candidate;
        }
    }

    let mut period = base_period;
    let mut pos = match snap(onset, phase as f64, radius(period)) {
        Some(f) if onset[f] > threshold => f as f64,
        _ => phase as f64,
    };
    let mut frames = vec![pos];

    loop {
        let predicted = pos + period;
        if predicted > (n - 1) as f64 {
            break;
        }
        pos = match snap(onset, predicted, radius(period)) {
            Some(f) if onset[f] > threshold => {
                let observed = f as f64;
                period = (period + PERIOD_SMOOTHING * ((observed - pos) - period))
                    .clamp(min_period, max_period);
                observed
            }
            _ => predicted,
        };
        frames.push(pos);
    }
    frames
}

/// Offset into the beat list of the first downbeat: the bar phase whose
/// beats carry the most onset strength.
pub fn downbeat_phase(env: &OnsetEnvelope, beat_frames: &[f64], beats_per_bar: usize) -> usize {
    if beats_per_bar <= 1 {
        return 0;
    }
    let strength = |f: f64| env.onset.get(f.round() as usize).copied().unwrap_or(0.0);
    let mut best = 0;
    let mut best_sum = f64::MIN;
    for phase in 0..beats_per_bar.min(beat_frames.len()) {
        let sum: f64 = beat_frames
            .iter()
            .skip(phase)
            .step_by(beats_per_bar)
            .map(|&f| strength(f))
            .sum();
        if sum > best_sum {
            best_sum = sum;
            best = phase;
        }
    }
    best
}

/// Beats and downbeats in seconds.
pub fn track(env: &OnsetEnvelope, bpm: f64, beats_per_bar: usize) -> BeatGrid {
    let frames = track_beat_frames(env, bpm);
    let beats: Vec<f64> = frames.iter().map(|&f| env.time_of(f)).collect();

    let phase = downbeat_phase(env, &frames, beats_per_bar);
    let downbeats = beats
        .iter()
        .skip(phase)
        .step_by(beats_per_bar.max(1))
        .copied()
        .collect();

    let tempo = match (beats.first(), beats.last()) {
        (Some(first), Some(last)) if beats.len() >= 2 && last > first => {
            60.0 * (beats.len() - 1) as f64 / (last - first)
        }
        _ => bpm,
    };

    BeatGrid {
        tempo,
        beats,
        downbeats,
    }
}
