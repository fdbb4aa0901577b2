use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
    #[error("FLAC decode error: {0}")]
    Flac(#[from] claxon::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mono samples in -1.0..=1.0.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Load a WAV or FLAC file and downmix it to mono.
pub fn load_audio(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "wav" | "wave" => load_wav(path),
        "flac" => load_flac(path),
        other => Err(DecodeError::UnsupportedFormat(other.to_string())),
    }
}

fn load_wav(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };
    Ok(DecodedAudio {
        samples: downmix(&interleaved, spec.channels)?,
        sample_rate: spec.sample_rate,
    })
}

fn load_flac(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let mut reader = claxon::FlacReader::open(path)?;
    let info = reader.streaminfo();
    let scale = int_scale(info.bits_per_sample as u16);
    let interleaved: Vec<f32> = reader
        .samples()
        .map(|s| s.map(|v| v as f32 * scale))
        .collect::<Result<_, _>>()?;
    Ok(DecodedAudio {
        samples: downmix(&interleaved, info.channels as u16)?,
        sample_rate: info.sample_rate,
    })
}

fn int_scale(bits_per_sample: u16) -> f32 {
    1.0 / (1u64 << bits_per_sample.clamp(1, 32).saturating_sub(1)) as f32
}

/// Average interleaved channels into one.
fn downmix(interleaved: &[f32], channels: u16) -> Result<Vec<f32>, DecodeError> {
    match channels {
        0 => Err(DecodeError::UnsupportedFormat("zero channels".to_string())),
        1 => Ok(interleaved.to_vec()),
        n => {
            let n = n as usize;
            Ok(interleaved
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect())
        }
    }
}
