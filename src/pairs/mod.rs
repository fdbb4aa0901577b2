//! Bulk mashup-pair search over a library snapshot.
//!
//! Tracks are bucketed by wheel position and sorted by tempo inside each
//! bucket, so a track only meets candidates in the handful of buckets its
//! key can reach, and only inside the tempo window its genre allows. The
//! result set is the same as comparing every pair.

pub mod index;

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::harmonic::{self, HarmonicPosition};
use crate::models::Track;
use crate::scoring::{MashupScore, Scorer};

pub use index::PairIndex;

/// Slack on the binary-search bounds; the exact tempo check runs afterwards.
const WINDOW_EPSILON: f64 = 1e-9;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Pair search cancelled")]
    Cancelled,
}

/// Filters applied on top of the scorer's own tempo and key rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairQuery {
    pub min_score: f64,
    /// Hard cap on |Δbpm|, independent of genre tolerance.
    pub max_tempo_delta: Option<f64>,
}

impl Default for PairQuery {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_tempo_delta: None,
        }
    }
}

impl PairQuery {
    pub fn new(min_score: f64, max_tempo_delta: Option<f64>) -> Self {
        let max_tempo_delta = match max_tempo_delta {
            Some(d) if !d.is_finite() || d < 0.0 => {
                log::warn!("Ignoring invalid max tempo delta {}", d);
                None
            }
            other => other,
        };
        Self {
            min_score: if min_score.is_finite() { min_score } else { 0.0 },
            max_tempo_delta,
        }
    }
}

/// Two tracks that work layered on top of each other.
#[derive(Debug, Clone, Serialize)]
pub struct MashupPair<'a> {
    pub track_a: &'a Track,
    pub track_b: &'a Track,
    pub score: MashupScore,
}

impl MashupPair<'_> {
    pub fn notes(&self) -> &[String] {
        &self.score.notes
    }
}

/// Score `a` against `b` if the pair passes every qualification rule.
pub(crate) fn qualify(
    scorer: &Scorer,
    query: &PairQuery,
    a: &Track,
    b: &Track,
) -> Option<MashupScore> {
    if a.id == b.id {
        return None;
    }
    if !scorer.key_options().allows(harmonic::tier(a.key, b.key)) {
        return None;
    }
    let delta = (a.bpm - b.bpm).abs();
    let tolerance = scorer
        .tempo_policy()
        .pair_tolerance(a.genre.as_deref(), b.genre.as_deref());
    if delta > tolerance {
        return None;
    }
    if query.max_tempo_delta.is_some_and(|max| delta > max) {
        return None;
    }
    let score = scorer.score_mashup(a, b);
    (score.total >= query.min_score).then_some(score)
}

/// Widest tempo distance at which `track` can still qualify with anything.
///
/// A known genre bounds the pair tolerance from above. An unknown genre
/// defers to the partner's, so the scan must cover the loosest table entry.
fn scan_radius(scorer: &Scorer, query: &PairQuery, track: &Track) -> f64 {
    let policy = scorer.tempo_policy();
    let radius = match track.genre.as_deref() {
        Some(g) if policy.is_known(g) => policy.tolerance(Some(g)),
        _ => policy.max_tolerance(),
    };
    match query.max_tempo_delta {
        Some(max) => radius.min(max),
        None => radius,
    }
}

/// Candidate positions per bucket, computed once per search.
fn neighbor_table(scorer: &Scorer) -> Vec<Vec<HarmonicPosition>> {
    HarmonicPosition::all()
        .map(|pos| harmonic::compatible_set(pos, scorer.key_options()))
        .collect()
}

/// Pairs where `i` is the earlier library entry.
fn scan_track<'a>(
    index: &PairIndex<'a>,
    neighbors: &[Vec<HarmonicPosition>],
    scorer: &Scorer,
    query: &PairQuery,
    i: usize,
) -> Vec<MashupPair<'a>> {
    let tracks = index.tracks();
    let a = &tracks[i];
    let radius = scan_radius(scorer, query, a);
    let lo = a.bpm - radius - WINDOW_EPSILON;
    let hi = a.bpm + radius + WINDOW_EPSILON;

    let mut out = Vec::new();
    for &pos in &neighbors[a.key.index()] {
        for &j in index.within(pos, lo, hi) {
            if j <= i {
                continue;
            }
            let b = &tracks[j];
            if let Some(score) = qualify(scorer, query, a, b) {
                out.push(MashupPair {
                    track_a: a,
                    track_b: b,
                    score,
                });
            }
        }
    }
    out
}

fn sort_pairs(pairs: &mut [MashupPair]) {
    pairs.sort_by(|x, y| {
        y.score
            .total
            .partial_cmp(&x.score.total)
            .unwrap_or(Ordering::Equal)
            .then_with(|| x.track_a.id.cmp(&y.track_a.id))
            .then_with(|| x.track_b.id.cmp(&y.track_b.id))
    });
}

/// Every qualifying pair in the library, best first.
pub fn find_pairs<'a>(library: &'a [Track], scorer: &Scorer, query: &PairQuery) -> Vec<MashupPair<'a>> {
    // A fresh token is never cancelled.
    find_pairs_cancellable(library, scorer, query, &CancelToken::new()).unwrap_or_default()
}

/// [`find_pairs`] that checks `cancel` before each track's scan.
///
/// The scan runs on the current rayon pool, one unit of work per track,
/// partitioned by harmonic bucket.
pub fn find_pairs_cancellable<'a>(
    library: &'a [Track],
    scorer: &Scorer,
    query: &PairQuery,
    cancel: &CancelToken,
) -> Result<Vec<MashupPair<'a>>, SearchError> {
    let index = PairIndex::build(library);
    let neighbors = neighbor_table(scorer);
    let index_ref = &index;

    let per_track: Vec<Vec<MashupPair<'a>>> = (0..harmonic::WHEEL_POSITIONS)
        .into_par_iter()
        .flat_map_iter(move |bucket| index_ref.bucket(bucket).iter().copied())
        .map(|i| {
            if cancel.is_cancelled() {
                return Err(SearchError::Cancelled);
            }
            Ok(scan_track(&index, &neighbors, scorer, query, i))
        })
        .collect::<Result<_, _>>()?;

    let mut pairs: Vec<MashupPair<'a>> = per_track.into_iter().flatten().collect();
    sort_pairs(&mut pairs);
    log::info!(
        "Pair search: {} tracks, {} pairs (min score {:.0})",
        library.len(),
        pairs.len(),
        query.min_score
    );
    Ok(pairs)
}

/// Highest-scoring partner for `target` at or above the configured floor.
pub fn find_best_partner<'a>(
    target: &'a Track,
    candidates: &'a [Track],
    scorer: &Scorer,
) -> Option<MashupPair<'a>> {
    let index = PairIndex::build(candidates);
    let query = PairQuery::new(scorer.config().min_partner_score, None);
    let radius = scan_radius(scorer, &query, target);
    let lo = target.bpm - radius - WINDOW_EPSILON;
    let hi = target.bpm + radius + WINDOW_EPSILON;

    let mut best: Option<(usize, MashupScore)> = None;
    for pos in harmonic::compatible_set(target.key, scorer.key_options()) {
        for &j in index.within(pos, lo, hi) {
            let Some(score) = qualify(scorer, &query, target, &candidates[j]) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((k, s)) => score.total > s.total || (score.total == s.total && j < *k),
            };
            if better {
                best = Some((j, score));
            }
        }
    }

    log::debug!(
        "Best partner for {}: {}",
        target.id,
        best.as_ref()
            .map(|(j, s)| format!("{} ({:.1})", candidates[*j].id, s.total))
            .unwrap_or_else(|| "none".to_string())
    );
    best.map(|(j, score)| MashupPair {
        track_a: target,
        track_b: &candidates[j],
        score,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::config::ScoringConfig;
    use crate::harmonic::CompatibleSetOptions;
    use crate::models::SpectralProfile;
    use crate::tempo::TempoPolicy;

    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn unit(&mut self) -> f64 {
            (self.next() % 1_000_000) as f64 / 1_000_000.0
        }

        fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
            &items[(self.next() % items.len() as u64) as usize]
        }
    }

    const GENRES: &[Option<&str>] = &[
        Some("house"),
        Some("techno"),
        Some("hip hop"),
        Some("drum and bass"),
        Some("polka"),
        None,
    ];

    fn library(n: usize, seed: u64) -> Vec<Track> {
        let mut rng = Lcg(seed);
        (0..n)
            .map(|i| {
                let key = HarmonicPosition::from_index((rng.next() % 24) as usize).unwrap();
                // Half-step grid plus a jitter so exact ties and window edges both occur.
                let bpm = 118.0 + (rng.next() % 32) as f64 * 0.5
                    + if rng.next() % 3 == 0 { rng.unit() * 0.1 } else { 0.0 };
                let mut t = Track::new(format!("t{i:03}"), format!("Track {i}"), vec![], bpm, key, rng.unit())
                    .unwrap();
                if let Some(g) = rng.pick(GENRES) {
                    t = t.with_genre(*g);
                }
                if rng.next() % 2 == 0 {
                    t = t
                        .with_spectral(SpectralProfile {
                            danceability: Some(rng.unit()),
                            valence: Some(rng.unit()),
                            ..Default::default()
                        })
                        .unwrap();
                }
                t
            })
            .collect()
    }

    fn brute_force(library: &[Track], scorer: &Scorer, query: &PairQuery) -> HashSet<(String, String)> {
        let mut out = HashSet::new();
        for i in 0..library.len() {
            for j in (i + 1)..library.len() {
                if qualify(scorer, query, &library[i], &library[j]).is_some() {
                    out.insert((library[i].id.clone(), library[j].id.clone()));
                }
            }
        }
        out
    }

    fn as_set(pairs: &[MashupPair]) -> HashSet<(String, String)> {
        pairs
            .iter()
            .map(|p| (p.track_a.id.clone(), p.track_b.id.clone()))
            .collect()
    }

    fn strict_scorer() -> Scorer {
        Scorer::new(
            TempoPolicy::default(),
            CompatibleSetOptions {
                include_energy_boost: false,
                include_modal: false,
            },
            ScoringConfig::default(),
        )
    }

    #[test]
    fn matches_brute_force() {
        let lib = library(300, 42);
        for scorer in [Scorer::default(), strict_scorer()] {
            for query in [
                PairQuery::default(),
                PairQuery::new(60.0, None),
                PairQuery::new(75.0, None),
                PairQuery::new(0.0, Some(1.0)),
                PairQuery::new(50.0, Some(0.5)),
            ] {
                let pairs = find_pairs(&lib, &scorer, &query);
                let expected = brute_force(&lib, &scorer, &query);
                assert_eq!(pairs.len(), expected.len(), "query {:?}", query);
                assert_eq!(as_set(&pairs), expected, "query {:?}", query);
            }
        }
    }

    #[test]
    fn results_sorted_filtered_and_unique() {
        let lib = library(200, 7);
        let query = PairQuery::new(55.0, None);
        let pairs = find_pairs(&lib, &Scorer::default(), &query);
        assert!(!pairs.is_empty());
        assert!(pairs.iter().all(|p| p.score.total >= 55.0));
        assert!(pairs.windows(2).all(|w| w[0].score.total >= w[1].score.total));

        let mut seen = HashSet::new();
        for p in &pairs {
            assert_ne!(p.track_a.id, p.track_b.id);
            let mut key = [p.track_a.id.as_str(), p.track_b.id.as_str()];
            key.sort();
            assert!(seen.insert(key), "duplicate pair {:?}", key);
        }
    }

    #[test]
    fn tempo_cap_and_genre_window() {
        let key: HarmonicPosition = "8A".parse().unwrap();
        let lib = vec![
            Track::new("a", "A", vec![], 128.0, key, 0.5).unwrap().with_genre("house"),
            Track::new("b", "B", vec![], 129.0, key, 0.5).unwrap().with_genre("house"),
            Track::new("c", "C", vec![], 131.0, key, 0.5).unwrap().with_genre("house"),
            // unknown genre defers to the hip hop partner's ±8 window
            Track::new("d", "D", vec![], 90.0, key, 0.5).unwrap(),
            Track::new("e", "E", vec![], 96.0, key, 0.5).unwrap().with_genre("hip hop"),
        ];
        let scorer = Scorer::default();

        let all = as_set(&find_pairs(&lib, &scorer, &PairQuery::default()));
        assert!(all.contains(&("a".to_string(), "b".to_string())));
        assert!(!all.contains(&("a".to_string(), "c".to_string())));
        assert!(all.contains(&("d".to_string(), "e".to_string())));

        let capped = as_set(&find_pairs(&lib, &scorer, &PairQuery::new(0.0, Some(0.5))));
        assert!(capped.is_empty());
    }

    #[test]
    fn duplicate_ids_never_pair() {
        let key: HarmonicPosition = "1B".parse().unwrap();
        let t = Track::new("same", "S", vec![], 120.0, key, 0.5).unwrap();
        let lib = vec![t.clone(), t];
        assert!(find_pairs(&lib, &Scorer::default(), &PairQuery::default()).is_empty());
    }

    #[test]
    fn cancelled_search_stops() {
        let lib = library(50, 3);
        let token = CancelToken::new();
        token.cancel();
        let result = find_pairs_cancellable(&lib, &Scorer::default(), &PairQuery::default(), &token);
        assert!(matches!(result, Err(SearchError::Cancelled)));
    }

    #[test]
    fn best_partner() {
        let target = Track::new("t", "T", vec![], 128.0, "8A".parse().unwrap(), 0.6)
            .unwrap()
            .with_genre("house");
        let candidates = vec![
            target.clone(),
            Track::new("adj", "Adj", vec![], 128.5, "9A".parse().unwrap(), 0.6)
                .unwrap()
                .with_genre("house"),
            Track::new("same", "Same", vec![], 128.0, "8A".parse().unwrap(), 0.6)
                .unwrap()
                .with_genre("house"),
            Track::new("clash", "Clash", vec![], 128.0, "3B".parse().unwrap(), 0.6)
                .unwrap()
                .with_genre("house"),
        ];
        let scorer = Scorer::default();
        let best = find_best_partner(&target, &candidates, &scorer).unwrap();
        assert_eq!(best.track_a.id, "t");
        assert_eq!(best.track_b.id, "same");
        assert!(!best.notes().is_empty());

        let only_clash = vec![candidates[3].clone()];
        assert!(find_best_partner(&target, &only_clash, &scorer).is_none());
    }

    #[test]
    fn best_partner_respects_floor() {
        let target = Track::new("t", "T", vec![], 128.0, "8A".parse().unwrap(), 0.0)
            .unwrap()
            .with_genre("house");
        // modal key, tempo at the window edge, max energy gap
        let weak = vec![Track::new("w", "W", vec![], 129.5, "11B".parse().unwrap(), 1.0)
            .unwrap()
            .with_genre("house")];
        assert!(find_best_partner(&target, &weak, &Scorer::default()).is_none());
    }
}
