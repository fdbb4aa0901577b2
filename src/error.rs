use thiserror::Error;

/// A malformed value handed to the engine by a caller.
///
/// Always names the offending field so the import pipeline can report which
/// library entry to fix. Nothing here is ever coerced into a valid value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Invalid wheel slot {0} (expected 1-12)")]
    InvalidSlot(u8),
    #[error("Unrecognized key notation: {0:?}")]
    InvalidKeyNotation(String),
    #[error("Invalid tempo for {field}: {value}")]
    InvalidTempo { field: &'static str, value: f64 },
    #[error("Invalid energy for {field}: {value}")]
    InvalidEnergy { field: &'static str, value: f64 },
    #[error("Invalid spectral descriptor {name}: {value} (expected 0.0-1.0)")]
    InvalidDescriptor { name: &'static str, value: f64 },
    #[error("Invalid duration: {value}")]
    InvalidDuration { value: f64 },
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),
    #[error("Missing required field: {field}")]
    EmptyField { field: &'static str },
}

/// Reject non-finite or non-positive tempos.
pub fn check_tempo(field: &'static str, bpm: f64) -> Result<f64, InputError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(InputError::InvalidTempo { field, value: bpm })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_check_rejects_bad_values() {
        assert_eq!(check_tempo("bpm", 128.0), Ok(128.0));
        assert!(check_tempo("bpm", 0.0).is_err());
        assert!(check_tempo("bpm", -120.0).is_err());
        assert!(check_tempo("bpm", f64::NAN).is_err());
        assert!(check_tempo("bpm", f64::INFINITY).is_err());
    }

    #[test]
    fn error_names_field() {
        let err = check_tempo("bpm_b", -1.0).unwrap_err();
        assert!(err.to_string().contains("bpm_b"));
    }
}
