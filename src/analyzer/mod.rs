pub mod beats;
pub mod decode;
pub mod envelope;
pub mod segments;

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::config::{AnalysisConfig, AppConfig, CrossfadeConfig};
use crate::db::models::AnalysisTarget;
use crate::db::Database;
use crate::error::{check_tempo, InputError};
use crate::models::TrackAnalysis;

/// Peak amplitude below which a signal counts as silence.
const SILENCE_PEAK: f64 = 1e-4;
/// Onset strength (relative to the loudest frame) below which the signal
/// has no usable transients.
const MIN_ONSET_RATIO: f64 = 1e-3;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),
    #[error("Audio is silent")]
    Silent,
    #[error("No periodic pulse in the audio")]
    NonPeriodic,
    #[error("Fewer than two beats found")]
    NoBeats,
    #[error("Decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),
    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("Analysis cancelled")]
    Cancelled,
}

/// Decoded mono audio plus what is already known about the track.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Tempo from an external analyzer; estimated from the audio when absent.
    pub tempo_prior: Option<f64>,
    pub genre: Option<String>,
    /// Time-signature override; the configured default otherwise.
    pub beats_per_bar: Option<u32>,
}

impl AnalysisRequest {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            tempo_prior: None,
            genre: None,
            beats_per_bar: None,
        }
    }

    fn validate(&self, config: &AnalysisConfig) -> Result<(), InputError> {
        if self.sample_rate == 0 {
            return Err(InputError::InvalidAudio("sample rate is zero".into()));
        }
        if self.samples.is_empty() {
            return Err(InputError::InvalidAudio("no samples".into()));
        }
        if let Some(i) = self.samples.iter().position(|s| !s.is_finite()) {
            return Err(InputError::InvalidAudio(format!("non-finite sample at index {i}")));
        }
        if let Some(bpm) = self.tempo_prior {
            check_tempo("tempo_prior", bpm)?;
            // Two octaves either side of the search range.
            let (lo, hi) = (config.min_bpm / 4.0, config.max_bpm * 4.0);
            if !(lo..=hi).contains(&bpm) {
                return Err(InputError::InvalidTempo { field: "tempo_prior", value: bpm });
            }
        }
        if self.beats_per_bar == Some(0) {
            return Err(InputError::InvalidAudio("beats per bar is zero".into()));
        }
        Ok(())
    }
}

/// Beat grid, energy curve and structure for one track.
pub fn analyze(
    request: &AnalysisRequest,
    config: &AnalysisConfig,
    crossfade: &CrossfadeConfig,
) -> Result<TrackAnalysis, AnalyzeError> {
    request.validate(config)?;
    let duration = request.samples.len() as f64 / request.sample_rate as f64;

    let peak = request
        .samples
        .iter()
        .fold(0.0f64, |m, &s| m.max((s as f64).abs()));
    if peak < SILENCE_PEAK {
        return Err(AnalyzeError::Silent);
    }

    // ── Onsets and tempo ──────────────────────────────────────────────
    let onsets = envelope::onset_envelope(&request.samples, request.sample_rate, config.onset_hop_secs);
    if onsets.max_onset() < MIN_ONSET_RATIO * onsets.max_rms() {
        return Err(AnalyzeError::NonPeriodic);
    }
    let tempo = match request.tempo_prior {
        Some(bpm) => bpm,
        None => beats::estimate_tempo(&onsets, config.min_bpm, config.max_bpm)
            .ok_or(AnalyzeError::NonPeriodic)?,
    };
    let periodicity = beats::periodicity(&onsets, tempo);
    if periodicity < config.min_periodicity {
        log::debug!("Periodicity {:.3} at {:.1} BPM", periodicity, tempo);
        return Err(AnalyzeError::NonPeriodic);
    }

    // ── Beat grid ─────────────────────────────────────────────────────
    let beats_per_bar = request.beats_per_bar.unwrap_or(config.beats_per_bar).max(1);
    let grid = beats::track(&onsets, tempo, beats_per_bar as usize);
    if grid.beats.len() < 2 {
        return Err(AnalyzeError::NoBeats);
    }

    // ── Energy and structure ──────────────────────────────────────────
    let profile = config.profile_for(request.genre.as_deref());
    let curve = envelope::energy_curve(
        &request.samples,
        request.sample_rate,
        profile.window_secs,
        config.energy_sample_rate,
    );
    let structure = segments::classify(
        &curve,
        &segments::Timing {
            duration,
            tempo: grid.tempo,
            beats_per_bar,
            beats: &grid.beats,
            downbeats: &grid.downbeats,
        },
        &profile,
        config,
        crossfade,
    );

    Ok(TrackAnalysis {
        duration,
        tempo: grid.tempo,
        beats_per_bar,
        beats: grid.beats,
        downbeats: grid.downbeats,
        energy_curve: curve,
        segments: structure.segments,
        mix_in_point: structure.mix_in_point,
        mix_out_point: structure.mix_out_point,
        drop_point: structure.drop_point,
        breakdown_point: structure.breakdown_point,
        ideal_crossfade_bars: structure.ideal_crossfade_bars,
    })
}

fn build_pool(jobs: usize) -> Result<rayon::ThreadPool, AnalyzeError> {
    Ok(rayon::ThreadPoolBuilder::new().num_threads(jobs.max(1)).build()?)
}

/// Analyze in-memory requests on a bounded pool. Requests reached after
/// `cancel` fires come back as [`AnalyzeError::Cancelled`].
pub fn analyze_batch(
    requests: &[AnalysisRequest],
    config: &AnalysisConfig,
    crossfade: &CrossfadeConfig,
    jobs: usize,
    cancel: &CancelToken,
) -> Result<Vec<Result<TrackAnalysis, AnalyzeError>>, AnalyzeError> {
    let pool = build_pool(jobs)?;
    Ok(pool.install(|| {
        requests
            .par_iter()
            .map(|request| {
                if cancel.is_cancelled() {
                    return Err(AnalyzeError::Cancelled);
                }
                analyze(request, config, crossfade)
            })
            .collect()
    }))
}

/// Source file identity: size and modification time.
pub fn source_fingerprint(path: &Path) -> std::io::Result<String> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(format!("{}:{}", meta.len(), mtime))
}

#[derive(Debug, Default)]
pub struct AnalyzeResult {
    pub analyzed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: bool,
}

/// Decode and analyze one library track.
fn analyze_target(
    target: &AnalysisTarget,
    config: &AppConfig,
) -> Result<TrackAnalysis, AnalyzeError> {
    let path = Path::new(&target.file_path);
    log::debug!(
        "Analyzing: {}",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
    );

    let audio = decode::load_audio(path)?;
    let request = AnalysisRequest {
        samples: audio.samples,
        sample_rate: audio.sample_rate,
        tempo_prior: Some(target.track.bpm),
        genre: target.track.genre.clone(),
        beats_per_bar: None,
    };
    analyze(&request, &config.analysis, &config.crossfade)
}

/// Analyze library tracks whose audio changed since their last analysis
/// (all of them with `force`).
///
/// Processes tracks in chunks: analyze a chunk in parallel, write results
/// to the store, then move on. A failed track keeps whatever analysis the
/// store already had.
pub fn analyze_library(
    db: &Database,
    config: &AppConfig,
    force: bool,
    jobs: usize,
    cancel: &CancelToken,
) -> Result<AnalyzeResult, AnalyzeError> {
    let mut result = AnalyzeResult::default();

    let mut pending: Vec<(AnalysisTarget, String)> = Vec::new();
    for target in db.get_analysis_targets()? {
        match source_fingerprint(Path::new(&target.file_path)) {
            Ok(fp) if !force && target.fingerprint.as_deref() == Some(fp.as_str()) => {
                result.skipped += 1;
            }
            Ok(fp) => pending.push((target, fp)),
            Err(e) => {
                log::warn!(
                    "Cannot read {} for {}: {}; keeping previous analysis",
                    target.file_path,
                    target.track.id,
                    e
                );
                result.failed += 1;
            }
        }
    }

    if pending.is_empty() {
        log::info!("No tracks to analyze ({} up to date)", result.skipped);
        return Ok(result);
    }

    log::info!("Analyzing {} tracks with {} workers", pending.len(), jobs);

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );

    let pool = build_pool(jobs)?;

    // Chunk size = jobs * 2 keeps every worker busy with bounded memory.
    let chunk_size = jobs.max(1) * 2;

    for chunk in pending.chunks(chunk_size) {
        let outcomes: Vec<_> = pool.install(|| {
            chunk
                .par_iter()
                .map(|(target, _)| {
                    if cancel.is_cancelled() {
                        return Err(AnalyzeError::Cancelled);
                    }
                    let outcome = analyze_target(target, config);
                    pb.inc(1);
                    outcome
                })
                .collect()
        });

        for ((target, fingerprint), outcome) in chunk.iter().zip(outcomes) {
            match outcome {
                Ok(analysis) => match db.store_analysis(&target.track.id, fingerprint, &analysis) {
                    Ok(()) => result.analyzed += 1,
                    Err(e) => {
                        log::error!("DB error storing analysis for {}: {}", target.track.id, e);
                        result.failed += 1;
                    }
                },
                Err(AnalyzeError::Cancelled) => result.cancelled = true,
                Err(e) => {
                    log::warn!(
                        "Analysis failed for {}: {}; keeping previous analysis",
                        target.track.id,
                        e
                    );
                    result.failed += 1;
                }
            }
        }

        pb.set_message(format!("{} stored, {} failed", result.analyzed, result.failed));
        if cancel.is_cancelled() {
            result.cancelled = true;
            break;
        }
    }

    pb.finish_with_message(format!(
        "Done: {} analyzed, {} failed{}",
        result.analyzed,
        result.failed,
        if result.cancelled { " (cancelled)" } else { "" }
    ));

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Track;

    const RATE: u32 = 8000;

    /// 10 ms decaying noise bursts at `bpm` starting at 0.25 s.
    fn click_track(bpm: f64, seconds: f64) -> Vec<f32> {
        let len = (seconds * RATE as f64) as usize;
        let mut samples = vec![0.0f32; len];
        let period = (60.0 / bpm * RATE as f64).round() as usize;
        let mut seed: u32 = 12345;
        let mut start = (0.25 * RATE as f64) as usize;
        while start < len {
            for i in 0..80.min(len - start) {
                seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
                let noise = ((seed >> 16) as f32 / 32768.0) - 1.0;
                samples[start + i] = 0.8 * noise * (1.0 - i as f32 / 80.0);
            }
            start += period;
        }
        samples
    }

    fn defaults() -> (AnalysisConfig, CrossfadeConfig) {
        (AnalysisConfig::default(), CrossfadeConfig::default())
    }

    #[test]
    fn click_track_with_prior() {
        let (config, crossfade) = defaults();
        let mut request = AnalysisRequest::new(click_track(120.0, 30.0), RATE);
        request.tempo_prior = Some(120.0);
        let analysis = analyze(&request, &config, &crossfade).unwrap();

        assert!((analysis.duration - 30.0).abs() < 1e-9);
        assert!((analysis.tempo - 120.0).abs() < 0.5, "tempo {}", analysis.tempo);
        assert!(analysis.beats.len() >= 55);
        assert!((analysis.beats[0] - 0.25).abs() < 0.02);
        for w in analysis.beats.windows(2) {
            assert!((w[1] - w[0] - 0.5).abs() < 0.02);
        }
        assert_eq!(analysis.downbeats.len(), analysis.beats.len().div_ceil(4));
        assert_eq!(analysis.energy_curve.values.len(), 300);

        let segs = &analysis.segments;
        assert_eq!(segs[0].start, 0.0);
        assert_eq!(segs[segs.len() - 1].end, analysis.duration);
        for w in segs.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
        assert!(analysis.mix_in_point <= analysis.mix_out_point);
        assert!(analysis.mix_out_point <= analysis.duration);
    }

    #[test]
    fn click_track_without_prior() {
        let (config, crossfade) = defaults();
        let request = AnalysisRequest::new(click_track(120.0, 30.0), RATE);
        let analysis = analyze(&request, &config, &crossfade).unwrap();
        assert!((analysis.tempo - 120.0).abs() < 1.0, "tempo {}", analysis.tempo);
    }

    #[test]
    fn silence_is_reported() {
        let (config, crossfade) = defaults();
        let request = AnalysisRequest::new(vec![0.0; RATE as usize * 5], RATE);
        assert!(matches!(analyze(&request, &config, &crossfade), Err(AnalyzeError::Silent)));
    }

    #[test]
    fn steady_tone_is_not_periodic() {
        let (config, crossfade) = defaults();
        // 400 Hz: exactly 20 samples per cycle, 4 cycles per frame
        let samples: Vec<f32> = (0..RATE as usize * 5)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * (i % 20) as f32 / 20.0).sin())
            .collect();
        let request = AnalysisRequest::new(samples, RATE);
        assert!(matches!(analyze(&request, &config, &crossfade), Err(AnalyzeError::NonPeriodic)));
    }

    #[test]
    fn single_click_has_no_beats() {
        let (config, crossfade) = defaults();
        // one burst, shorter than a beat period
        let mut request = AnalysisRequest::new(click_track(120.0, 0.4), RATE);
        request.tempo_prior = Some(120.0);
        let err = analyze(&request, &config, &crossfade).unwrap_err();
        assert!(matches!(err, AnalyzeError::NoBeats | AnalyzeError::NonPeriodic), "{err}");
    }

    #[test]
    fn garbled_requests_are_input_errors() {
        let (config, crossfade) = defaults();
        let cases = [
            AnalysisRequest::new(vec![], RATE),
            AnalysisRequest::new(vec![0.1; 10], 0),
            AnalysisRequest::new(vec![0.1, f32::NAN], RATE),
            AnalysisRequest {
                tempo_prior: Some(-3.0),
                ..AnalysisRequest::new(vec![0.1; 10], RATE)
            },
            AnalysisRequest {
                beats_per_bar: Some(0),
                ..AnalysisRequest::new(vec![0.1; 10], RATE)
            },
        ];
        for request in &cases {
            assert!(matches!(
                analyze(request, &config, &crossfade),
                Err(AnalyzeError::Input(_))
            ));
        }
    }

    #[test]
    fn out_of_range_prior_is_rejected() {
        let (config, crossfade) = defaults();
        for bpm in [1e-300, 5.0, 2000.0, 1e300] {
            let mut request = AnalysisRequest::new(click_track(120.0, 4.0), RATE);
            request.tempo_prior = Some(bpm);
            let err = analyze(&request, &config, &crossfade).unwrap_err();
            assert!(
                matches!(
                    err,
                    AnalyzeError::Input(InputError::InvalidTempo { field: "tempo_prior", .. })
                ),
                "{bpm}: {err}"
            );
        }
    }

    #[test]
    fn batch_respects_cancellation() {
        let (config, crossfade) = defaults();
        let mut request = AnalysisRequest::new(click_track(120.0, 10.0), RATE);
        request.tempo_prior = Some(120.0);
        let requests = vec![request.clone(), AnalysisRequest::new(vec![0.0; 800], RATE)];

        let results = analyze_batch(&requests, &config, &crossfade, 2, &CancelToken::new()).unwrap();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(AnalyzeError::Silent)));

        let token = CancelToken::new();
        token.cancel();
        let results = analyze_batch(&requests, &config, &crossfade, 2, &token).unwrap();
        assert!(results.iter().all(|r| matches!(r, Err(AnalyzeError::Cancelled))));
    }

    fn write_wav(path: &Path, samples: &[f32]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample((s * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn library_run_stores_and_skips_unchanged() {
        let dir = std::env::temp_dir().join(format!("mixwheel_lib_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let good = dir.join("good.wav");
        let silent = dir.join("silent.wav");
        write_wav(&good, &click_track(120.0, 12.0));
        write_wav(&silent, &vec![0.0; RATE as usize]);

        let db = Database::open_in_memory().unwrap();
        let track = |id: &str| Track::new(id, id, vec![], 120.0, "8A".parse().unwrap(), 0.5).unwrap();
        db.upsert_track(&track("good"), good.to_str()).unwrap();
        db.upsert_track(&track("silent"), silent.to_str()).unwrap();
        db.upsert_track(&track("gone"), dir.join("missing.wav").to_str()).unwrap();

        let config = AppConfig::default();
        let first = analyze_library(&db, &config, false, 2, &CancelToken::new()).unwrap();
        assert_eq!(first.analyzed, 1);
        assert_eq!(first.failed, 2);
        assert!(db.get_analysis("good").unwrap().is_some());
        assert!(db.get_analysis("silent").unwrap().is_none());

        let second = analyze_library(&db, &config, false, 2, &CancelToken::new()).unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.analyzed, 0);

        let forced = analyze_library(&db, &config, true, 2, &CancelToken::new()).unwrap();
        assert_eq!(forced.analyzed, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn failed_reanalysis_keeps_stored_record() {
        let dir = std::env::temp_dir().join(format!("mixwheel_keep_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("track.wav");
        write_wav(&path, &click_track(120.0, 12.0));

        let db = Database::open_in_memory().unwrap();
        let track = Track::new("t", "T", vec![], 120.0, "8A".parse().unwrap(), 0.5).unwrap();
        db.upsert_track(&track, path.to_str()).unwrap();
        let config = AppConfig::default();
        analyze_library(&db, &config, false, 1, &CancelToken::new()).unwrap();
        let before = db.get_analysis("t").unwrap().unwrap();

        // replace the audio with silence; the old analysis must survive
        write_wav(&path, &vec![0.0; RATE as usize * 2]);
        let rerun = analyze_library(&db, &config, true, 1, &CancelToken::new()).unwrap();
        assert_eq!(rerun.failed, 1);
        assert_eq!(db.get_analysis("t").unwrap(), Some(before));

        std::fs::remove_dir_all(&dir).ok();
    }
}
