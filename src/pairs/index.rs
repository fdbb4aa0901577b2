use crate::harmonic::{HarmonicPosition, WHEEL_POSITIONS};
use crate::models::Track;

/// Library snapshot bucketed by wheel position, each bucket sorted by tempo.
///
/// Holds indices into the caller's slice; the library itself is borrowed,
/// never copied.
pub struct PairIndex<'a> {
    tracks: &'a [Track],
    buckets: Vec<Vec<usize>>,
    bucket_bpms: Vec<Vec<f64>>,
}

impl<'a> PairIndex<'a> {
    pub fn build(tracks: &'a [Track]) -> Self {
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); WHEEL_POSITIONS];
        for (i, track) in tracks.iter().enumerate() {
            buckets[track.key.index()].push(i);
        }
        for bucket in &mut buckets {
            bucket.sort_by(|&x, &y| {
                tracks[x]
                    .bpm
                    .partial_cmp(&tracks[y].bpm)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(x.cmp(&y))
            });
        }
        let bucket_bpms = buckets
            .iter()
            .map(|b| b.iter().map(|&i| tracks[i].bpm).collect())
            .collect();

        Self { tracks, buckets, bucket_bpms }
    }

    pub fn tracks(&self) -> &'a [Track] {
        self.tracks
    }

    /// Track indices in one bucket, ascending tempo.
    pub fn bucket(&self, bucket: usize) -> &[usize] {
        self.buckets.get(bucket).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Track indices at `position` whose tempo lies in `[lo, hi]`, found by
    /// binary search on the bucket's sorted tempos.
    pub fn within(&self, position: HarmonicPosition, lo: f64, hi: f64) -> &[usize] {
        let b = position.index();
        let bpms = &self.bucket_bpms[b];
        let start = bpms.partition_point(|&bpm| bpm < lo);
        let end = bpms.partition_point(|&bpm| bpm <= hi);
        if start >= end {
            return &[];
        }
        &self.buckets[b][start..end]
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, key: &str, bpm: f64) -> Track {
        Track::new(id, id, vec![], bpm, key.parse().unwrap(), 0.5).unwrap()
    }

    #[test]
    fn buckets_sorted_by_tempo() {
        let tracks = vec![
            track("a", "8A", 130.0),
            track("b", "8A", 120.0),
            track("c", "8B", 125.0),
            track("d", "8A", 125.0),
        ];
        let index = PairIndex::build(&tracks);
        let pos: HarmonicPosition = "8A".parse().unwrap();
        assert_eq!(index.bucket(pos.index()), &[1, 3, 0]);
        assert_eq!(index.bucket("8B".parse::<HarmonicPosition>().unwrap().index()), &[2]);
        assert!(index.bucket(99).is_empty());
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn window_is_inclusive() {
        let tracks = vec![
            track("a", "1A", 118.0),
            track("b", "1A", 120.0),
            track("c", "1A", 122.0),
            track("d", "1A", 124.0),
        ];
        let index = PairIndex::build(&tracks);
        let pos: HarmonicPosition = "1A".parse().unwrap();
        assert_eq!(index.within(pos, 120.0, 122.0), &[1, 2]);
        assert_eq!(index.within(pos, 121.0, 121.5), &[] as &[usize]);
        assert_eq!(index.within(pos, 0.0, 1000.0).len(), 4);
        assert!(index.within("2A".parse().unwrap(), 0.0, 1000.0).is_empty());
    }
}
