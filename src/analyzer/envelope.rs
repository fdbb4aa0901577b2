//! Frame-level loudness curves computed from mono samples.

use crate::models::EnergyEnvelope;

/// RMS per non-overlapping frame plus its half-wave rectified first
/// difference, which peaks where energy rises (onsets).
#[derive(Debug, Clone)]
pub struct OnsetEnvelope {
    /// Seconds per frame.
    pub hop_secs: f64,
    pub rms: Vec<f64>,
    pub onset: Vec<f64>,
}

impl OnsetEnvelope {
    pub fn len(&self) -> usize {
        self.onset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.onset.is_empty()
    }

    pub fn max_onset(&self) -> f64 {
        self.onset.iter().copied().fold(0.0, f64::max)
    }

    pub fn max_rms(&self) -> f64 {
        self.rms.iter().copied().fold(0.0, f64::max)
    }

    pub fn mean_onset(&self) -> f64 {
        if self.onset.is_empty() {
            return 0.0;
        }
        self.onset.iter().sum::<f64>() / self.onset.len() as f64
    }

    /// Frame position to seconds.
    pub fn time_of(&self, frame: f64) -> f64 {
        frame * self.hop_secs
    }
}

/// Hop in samples for a hop in seconds; never zero.
pub fn hop_samples(sample_rate: u32, hop_secs: f64) -> usize {
    ((sample_rate as f64 * hop_secs).round() as usize).max(1)
}

pub fn frame_rms(samples: &[f32], hop: usize) -> Vec<f64> {
    samples
        .chunks(hop)
        .map(|frame| {
            let sum: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
            (sum / frame.len() as f64).sqrt()
        })
        .collect()
}

pub fn onset_envelope(samples: &[f32], sample_rate: u32, hop_secs: f64) -> OnsetEnvelope {
    let hop = hop_samples(sample_rate, hop_secs);
    let rms = frame_rms(samples, hop);
    let mut onset = Vec::with_capacity(rms.len());
    for (i, &r) in rms.iter().enumerate() {
        onset.push(if i == 0 { 0.0 } else { (r - rms[i - 1]).max(0.0) });
    }
    OnsetEnvelope {
        hop_secs: hop as f64 / sample_rate as f64,
        rms,
        onset,
    }
}

/// Centred RMS over `window_secs`, sampled `curve_rate` times per second and
/// normalized so the loudest sample is 1.0.
pub fn energy_curve(
    samples: &[f32],
    sample_rate: u32,
    window_secs: f64,
    curve_rate: f64,
) -> EnergyEnvelope {
    let sr = sample_rate as f64;
    let duration = samples.len() as f64 / sr;
    let count = ((duration * curve_rate).ceil() as usize).max(1);

    // prefix[k] = sum of squares of samples[..k]
    let mut prefix = Vec::with_capacity(samples.len() + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0;
    for &s in samples {
        acc += (s as f64) * (s as f64);
        prefix.push(acc);
    }

    let half = window_secs / 2.0;
    let mut values: Vec<f64> = (0..count)
        .map(|j| {
            let t = j as f64 / curve_rate;
            let start = (((t - half) * sr).max(0.0) as usize).min(samples.len());
            let end = (((t + half) * sr).max(0.0) as usize).min(samples.len());
            if end > start {
                ((prefix[end] - prefix[start]) / (end - start) as f64).sqrt()
            } else {
                0.0
            }
        })
        .collect();

    let peak = values.iter().copied().fold(0.0, f64::max);
    if peak > 0.0 {
        for v in &mut values {
            *v /= peak;
        }
    }

    EnergyEnvelope {
        sample_rate: curve_rate,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_square_wave() {
        let samples = vec![0.5f32, -0.5, 0.5, -0.5, 0.0, 0.0, 0.0, 0.0];
        let rms = frame_rms(&samples, 4);
        assert_eq!(rms.len(), 2);
        assert!((rms[0] - 0.5).abs() < 1e-9);
        assert_eq!(rms[1], 0.0);
    }

    #[test]
    fn onsets_are_rises_only() {
        let mut samples = vec![0.0f32; 40];
        for s in &mut samples[10..20] {
            *s = 1.0;
        }
        let env = onset_envelope(&samples, 100, 0.1);
        assert_eq!(env.rms.len(), 4);
        assert_eq!(env.onset, vec![0.0, 1.0, 0.0, 0.0]);
        assert!((env.hop_secs - 0.1).abs() < 1e-12);
        assert_eq!(env.max_onset(), 1.0);
    }

    #[test]
    fn energy_curve_normalized_and_rate_independent() {
        // 2 s quiet then 2 s loud at 1 kHz
        let mut samples = vec![0.1f32; 2000];
        samples.extend(vec![0.8f32; 2000]);
        let curve = energy_curve(&samples, 1000, 0.5, 10.0);
        assert_eq!(curve.values.len(), 40);
        assert_eq!(curve.sample_rate, 10.0);
        let peak = curve.values.iter().copied().fold(0.0, f64::max);
        assert!((peak - 1.0).abs() < 1e-9);
        assert!(curve.values[5] < 0.2);
        assert!(curve.values[35] > 0.99);
    }

    #[test]
    fn silent_curve_stays_zero() {
        let curve = energy_curve(&[0.0; 500], 100, 1.0, 10.0);
        assert!(curve.values.iter().all(|&v| v == 0.0));
    }
}
