use std::cmp::Ordering;

use crate::harmonic::CompatibilityTier;
use crate::models::{format_time, Track, TrackAnalysis};

use super::{CompositeScore, SubScore};

/// Inputs for note generation beyond the score itself.
pub struct NoteContext<'a> {
    pub a: &'a Track,
    pub b: &'a Track,
    pub analysis_a: Option<&'a TrackAnalysis>,
    pub analysis_b: Option<&'a TrackAnalysis>,
    pub missing_genre: bool,
    pub missing_spectral: bool,
    pub weak_ratio: f64,
}

/// Short templated advice, weakest sub-score first.
pub fn mixing_notes(score: &CompositeScore, ctx: &NoteContext) -> Vec<String> {
    let mut notes = Vec::new();

    let mut weak: Vec<(&'static str, SubScore)> = score
        .sub_scores()
        .into_iter()
        .filter(|(_, s)| s.ratio() < ctx.weak_ratio)
        .collect();
    weak.sort_by(|x, y| x.1.ratio().partial_cmp(&y.1.ratio()).unwrap_or(Ordering::Equal));

    for (name, _) in weak {
        let note = match name {
            "harmonic" if score.tier == CompatibilityTier::Incompatible => {
                "Keys clash: keep the overlap short or blend over a percussion-only section"
                    .to_string()
            }
            "harmonic" => "Distant keys: keep melodic elements apart during the blend".to_string(),
            "tempo" => format!(
                "Large tempo gap ({:.1} BPM against a ±{:.1} window): consider tempo-stretching",
                score.bpm_delta, score.tempo_tolerance
            ),
            "energy" if ctx.b.energy > ctx.a.energy => format!(
                "Big energy lift into {}: ride a filter up through the blend",
                ctx.b.name
            ),
            "energy" => "Energy drops sharply: use a longer blend or swap the lows early".to_string(),
            _ => "Different textures: filter one side during the overlap".to_string(),
        };
        notes.push(note);
    }

    match score.tier {
        CompatibilityTier::EnergyBoost => {
            notes.push("Energy boost key change: bring it in on a phrase boundary".to_string())
        }
        CompatibilityTier::Modal => {
            notes.push("Parallel key: expect a mood shift between minor and major".to_string())
        }
        _ => {}
    }

    if ctx.missing_genre {
        notes.push(format!(
            "Genre unknown: tempo window defaulted to ±{:.1} BPM",
            score.tempo_tolerance
        ));
    }
    if ctx.missing_spectral {
        notes.push("No spectral descriptors: texture match assumed neutral".to_string());
    }

    let fade_secs = ctx.analysis_a.map(TrackAnalysis::crossfade_seconds);
    if let Some(a) = ctx.analysis_a {
        notes.push(format!(
            "Mix out of {} at {}: {}-bar crossfade (~{:.0}s at {:.0} BPM)",
            ctx.a.name,
            format_time(a.mix_out_point),
            a.ideal_crossfade_bars,
            a.crossfade_seconds(),
            a.tempo
        ));
    }
    if let Some(b) = ctx.analysis_b {
        notes.push(format!(
            "Bring {} in from {}",
            ctx.b.name,
            format_time(b.mix_in_point)
        ));
        let fade = fade_secs.unwrap_or_else(|| b.crossfade_seconds());
        if let Some(drop) = b.drop_point {
            if drop >= b.mix_in_point && drop - b.mix_in_point < fade {
                notes.push(format!(
                    "{} drops at {} inside the fade: start the blend earlier or cut in on the drop",
                    ctx.b.name,
                    format_time(drop)
                ));
            }
        }
    }

    if notes.is_empty() {
        notes.push("Smooth match: a standard blend will work".to_string());
    }
    notes
}
