use crate::models::SpectralProfile;

/// L1 closeness across the descriptors both profiles carry: 1.0 identical,
/// 0.0 maximally different. `None` when there's nothing to compare.
pub fn similarity(a: Option<&SpectralProfile>, b: Option<&SpectralProfile>) -> Option<f64> {
    let (a, b) = (a?, b?);
    let mut total_diff = 0.0;
    let mut shared = 0usize;
    for ((_, x), (_, y)) in a.descriptors().iter().zip(b.descriptors().iter()) {
        if let (Some(x), Some(y)) = (x, y) {
            total_diff += (x - y).abs();
            shared += 1;
        }
    }
    if shared == 0 {
        None
    } else {
        Some((1.0 - total_diff / shared as f64).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_profiles() {
        let p = SpectralProfile {
            acousticness: Some(0.2),
            valence: Some(0.9),
            ..Default::default()
        };
        assert_eq!(similarity(Some(&p), Some(&p)), Some(1.0));
    }

    #[test]
    fn only_shared_descriptors_count() {
        let a = SpectralProfile {
            acousticness: Some(0.0),
            danceability: Some(1.0),
            ..Default::default()
        };
        let b = SpectralProfile {
            acousticness: Some(0.5),
            speechiness: Some(0.9),
            ..Default::default()
        };
        assert_eq!(similarity(Some(&a), Some(&b)), Some(0.5));
    }

    #[test]
    fn missing_profiles() {
        let p = SpectralProfile {
            valence: Some(0.3),
            ..Default::default()
        };
        assert_eq!(similarity(None, Some(&p)), None);
        assert_eq!(similarity(Some(&p), Some(&SpectralProfile::default())), None);
    }
}
