//! Structural segmentation of a track from its energy curve and beat grid.
//!
//! The curve is cut into bar-aligned windows. Each window is compared with
//! the track mean (to find the quiet edges) and with a rolling average of the
//! windows before it (to find rises, drops and breakdowns). Adjacent windows
//! with the same label merge into one segment.

use crate::config::{AnalysisConfig, CrossfadeConfig, GenreProfile};
use crate::models::{EnergyEnvelope, Segment, SegmentType};

/// Segments plus the mix points derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub segments: Vec<Segment>,
    pub mix_in_point: f64,
    pub mix_out_point: f64,
    pub drop_point: Option<f64>,
    pub breakdown_point: Option<f64>,
    pub ideal_crossfade_bars: u32,
}

/// Inputs that describe one track's timing.
pub struct Timing<'a> {
    pub duration: f64,
    pub tempo: f64,
    pub beats_per_bar: u32,
    pub beats: &'a [f64],
    pub downbeats: &'a [f64],
}

/// Window boundaries from `0` to `duration`, preferring downbeats, then
/// beats, then a fixed grid at the tempo.
fn window_bounds(timing: &Timing, config: &AnalysisConfig) -> Vec<f64> {
    let window_bars = config.window_bars.max(1) as usize;
    let bpb = timing.beats_per_bar.max(1) as usize;
    let beat_secs = if timing.tempo > 0.0 { 60.0 / timing.tempo } else { 0.5 };

    let points: Vec<f64> = if timing.downbeats.len() >= 2 {
        timing.downbeats.iter().step_by(window_bars).copied().collect()
    } else if timing.beats.len() >= 2 {
        timing.beats.iter().step_by(window_bars * bpb).copied().collect()
    } else {
        let step = beat_secs * (window_bars * bpb) as f64;
        let count = (timing.duration / step).ceil() as usize;
        (0..count).map(|i| i as f64 * step).collect()
    };

    // Points closer than a beat to a neighbour would leave a sliver window.
    let mut bounds = vec![0.0];
    for p in points {
        let last = bounds[bounds.len() - 1];
        if p - last >= beat_secs && timing.duration - p >= beat_secs {
            bounds.push(p);
        }
    }
    bounds.push(timing.duration);
    bounds
}

/// Label per window. `energies` is non-empty.
fn label_windows(
    energies: &[f64],
    config: &AnalysisConfig,
    profile: &GenreProfile,
) -> Vec<SegmentType> {
    let n = energies.len();
    let mean = energies.iter().sum::<f64>() / n as f64;
    let high = |e: f64| e >= mean * config.high_factor;
    let low = |e: f64| e < mean * config.low_factor;

    if !energies.iter().any(|&e| high(e)) {
        return vec![SegmentType::Verse; n];
    }

    let mut labels = vec![SegmentType::Unknown; n];

    // Intro: the leading quiet run, if a stable loud window follows it.
    let first_stable_high =
        (0..n).find(|&i| high(energies[i]) && (i + 1 == n || high(energies[i + 1])));
    let mut intro_end = 0;
    if let Some(first) = first_stable_high {
        while intro_end < first && low(energies[intro_end]) {
            labels[intro_end] = SegmentType::Intro;
            intro_end += 1;
        }
    }

    // Outro: the trailing quiet run after the last loud window.
    let mut outro_start = n;
    if let Some(last_high) = (0..n).rev().find(|&i| high(energies[i])) {
        while outro_start > last_high + 1 && low(energies[outro_start - 1]) {
            outro_start -= 1;
            labels[outro_start] = SegmentType::Outro;
        }
    }

    let window = config.rolling_windows.max(1);
    let mut prev = if intro_end > 0 { Some(SegmentType::Intro) } else { None };
    let mut saw_drop = false;

    for i in intro_end..outro_start {
        let e = energies[i];
        let rolling = if i == 0 {
            e
        } else {
            let from = i.saturating_sub(window);
            energies[from..i].iter().sum::<f64>() / (i - from) as f64
        };
        let next = energies.get(i + 1).copied();

        let label = if prev == Some(SegmentType::Drop) && high(e) {
            SegmentType::Drop
        } else if high(e)
            && (prev == Some(SegmentType::Buildup) || e >= rolling * profile.drop_multiplier)
        {
            saw_drop = true;
            SegmentType::Drop
        } else if saw_drop
            && (e < rolling * config.breakdown_ratio
                || (prev == Some(SegmentType::Breakdown) && !high(e) && e < mean))
        {
            SegmentType::Breakdown
        } else if i > 0
            && e >= rolling * config.buildup_multiplier
            && e > energies[i - 1]
            && next.is_some_and(|nx| nx > e || high(nx))
        {
            SegmentType::Buildup
        } else if !low(e) && !high(e) {
            SegmentType::Verse
        } else if high(e) && (e - rolling).abs() <= 0.25 * rolling {
            SegmentType::Verse
        } else {
            SegmentType::Unknown
        };

        labels[i] = label;
        prev = Some(label);
    }
    labels
}

fn beats_between(beats: &[f64], start: f64, end: f64) -> usize {
    let lo = beats.partition_point(|&b| b < start);
    let hi = beats.partition_point(|&b| b < end);
    hi.saturating_sub(lo)
}

/// Segment a track and derive its mix points.
pub fn classify(
    envelope: &EnergyEnvelope,
    timing: &Timing,
    profile: &GenreProfile,
    config: &AnalysisConfig,
    crossfade: &CrossfadeConfig,
) -> Structure {
    let bounds = window_bounds(timing, config);
    let energies: Vec<f64> = bounds
        .windows(2)
        .map(|w| envelope.mean_between(w[0], w[1]))
        .collect();
    let labels = label_windows(&energies, config, profile);

    let mut segments: Vec<Segment> = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        let (start, end) = (bounds[i], bounds[i + 1]);
        match segments.last_mut() {
            Some(seg) if seg.kind == *label => {
                // duration-weighted running mean
                let (d0, d1) = (seg.duration(), end - start);
                seg.energy = (seg.energy * d0 + energies[i] * d1) / (d0 + d1);
                seg.end = end;
            }
            _ => segments.push(Segment {
                kind: *label,
                start,
                end,
                energy: energies[i],
                beat_count: 0,
            }),
        }
    }
    for seg in &mut segments {
        seg.beat_count = beats_between(timing.beats, seg.start, seg.end);
    }

    let first = |kind: SegmentType| segments.iter().find(|s| s.kind == kind);
    let intro = first(SegmentType::Intro);
    let outro = first(SegmentType::Outro);
    let last_drop = segments.iter().rev().find(|s| s.kind == SegmentType::Drop);

    let mix_in_point = intro.map(|s| s.end).unwrap_or(0.0).clamp(0.0, timing.duration);
    let mix_out_point = outro
        .map(|s| s.start)
        .or(last_drop.map(|s| s.end))
        .unwrap_or(timing.duration)
        .clamp(mix_in_point, timing.duration);

    let hard_drop = segments
        .iter()
        .any(|s| s.kind == SegmentType::Drop && s.energy >= config.drop_energy_threshold);
    let ideal_crossfade_bars = if hard_drop {
        crossfade.drop_bars
    } else if outro.is_some() {
        crossfade.outro_bars
    } else {
        crossfade.default_bars
    };

    let structure = Structure {
        drop_point: first(SegmentType::Drop).map(|s| s.start),
        breakdown_point: first(SegmentType::Breakdown).map(|s| s.start),
        mix_in_point,
        mix_out_point,
        ideal_crossfade_bars,
        segments,
    };
    log::debug!(
        "{} segments, mix in {:.1}s, mix out {:.1}s, {} bars",
        structure.segments.len(),
        structure.mix_in_point,
        structure.mix_out_point,
        structure.ideal_crossfade_bars
    );
    structure
}
