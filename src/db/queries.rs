use super::models::{AnalysisTarget, LibraryStats, TrackRow};
use super::{Database, Result};
use crate::models::{Track, TrackAnalysis};
use rusqlite::{params, OptionalExtension};

impl Database {
    /// Insert or update a track. A `None` file path keeps any stored path.
    pub fn upsert_track(&self, t: &Track, file_path: Option<&str>) -> Result<()> {
        let artists = serde_json::to_string(&t.artists)?;
        let spectral = t
            .spectral
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO tracks (
                id, name, artists, bpm, camelot_key, energy,
                genre, duration_secs, spectral, file_path,
                updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10,
                datetime('now')
            )
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                artists = excluded.artists,
                bpm = excluded.bpm,
                camelot_key = excluded.camelot_key,
                energy = excluded.energy,
                genre = excluded.genre,
                duration_secs = excluded.duration_secs,
                spectral = excluded.spectral,
                file_path = COALESCE(excluded.file_path, tracks.file_path),
                updated_at = datetime('now')
            ",
            params![
                t.id, t.name, artists, t.bpm, t.key.to_string(), t.energy,
                t.genre, t.duration, spectral, file_path,
            ],
        )?;
        Ok(())
    }

    /// Every library track, ordered by id so searches see a stable order.
    pub fn get_all_tracks(&self) -> Result<Vec<Track>> {
        let sql = format!("SELECT {} FROM tracks ORDER BY id", TrackRow::COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], TrackRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(TrackRow::into_track).collect()
    }

    pub fn get_track(&self, id: &str) -> Result<Option<Track>> {
        let sql = format!("SELECT {} FROM tracks WHERE id = ?1", TrackRow::COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], TrackRow::from_row)
            .optional()?;
        row.map(TrackRow::into_track).transpose()
    }

    /// Tracks with an audio file, with their stored analysis fingerprint.
    pub fn get_analysis_targets(&self) -> Result<Vec<AnalysisTarget>> {
        let sql = format!(
            "SELECT {}, t.file_path, a.fingerprint
             FROM tracks t
             LEFT JOIN track_analysis a ON a.track_id = t.id
             WHERE t.file_path IS NOT NULL
             ORDER BY t.id",
            TrackRow::COLUMNS
                .split(", ")
                .map(|c| format!("t.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((TrackRow::from_row(row)?, row.get::<_, String>(9)?, row.get::<_, Option<String>>(10)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(row, file_path, fingerprint)| {
                Ok(AnalysisTarget {
                    track: row.into_track()?,
                    file_path,
                    fingerprint,
                })
            })
            .collect()
    }

    /// Replace a track's analysis and segment rows in a single transaction.
    pub fn store_analysis(
        &self,
        track_id: &str,
        fingerprint: &str,
        analysis: &TrackAnalysis,
    ) -> Result<()> {
        let json = serde_json::to_string(analysis)?;
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO track_analysis (
                track_id, fingerprint, duration, tempo,
                mix_in_point, mix_out_point, drop_point, breakdown_point,
                crossfade_bars, analysis_json, analyzed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                track_id,
                fingerprint,
                analysis.duration,
                analysis.tempo,
                analysis.mix_in_point,
                analysis.mix_out_point,
                analysis.drop_point,
                analysis.breakdown_point,
                analysis.ideal_crossfade_bars,
                json,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM track_segments WHERE track_id = ?1", params![track_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO track_segments (
                    track_id, segment_index, kind, start_time, end_time, energy, beat_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (i, s) in analysis.segments.iter().enumerate() {
                stmt.execute(params![
                    track_id,
                    i as i64,
                    s.kind.as_str(),
                    s.start,
                    s.end,
                    s.energy,
                    s.beat_count as i64,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_analysis(&self, track_id: &str) -> Result<Option<TrackAnalysis>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT analysis_json FROM track_analysis WHERE track_id = ?1",
                params![track_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    /// Get library statistics.
    pub fn stats(&self) -> Result<LibraryStats> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };

        let total_tracks = count("SELECT COUNT(*) FROM tracks")?;
        let with_audio = count("SELECT COUNT(*) FROM tracks WHERE file_path IS NOT NULL")?;
        let analyzed_tracks = count("SELECT COUNT(*) FROM track_analysis")?;
        let with_genre = count("SELECT COUNT(*) FROM tracks WHERE genre IS NOT NULL")?;
        let with_spectral = count("SELECT COUNT(*) FROM tracks WHERE spectral IS NOT NULL")?;

        let mut key_stmt = self.conn.prepare(
            "SELECT camelot_key, COUNT(*) FROM tracks GROUP BY camelot_key ORDER BY COUNT(*) DESC, camelot_key",
        )?;
        let keys: Vec<(String, i64)> = key_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut genre_stmt = self.conn.prepare(
            "SELECT LOWER(genre), COUNT(*)
             FROM tracks
             WHERE genre IS NOT NULL
             GROUP BY LOWER(genre)
             ORDER BY COUNT(*) DESC
             LIMIT 20",
        )?;
        let genres: Vec<(String, i64)> = genre_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LibraryStats {
            total_tracks,
            with_audio,
            analyzed_tracks,
            with_genre,
            with_spectral,
            keys,
            genres,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnergyEnvelope, Segment, SegmentType, SpectralProfile};

    fn test_track(id: &str) -> Track {
        Track::new(id, "Strings of Life", vec!["Rhythim Is Rhythim".into()], 124.0, "8A".parse().unwrap(), 0.7)
            .unwrap()
            .with_genre("Detroit Techno")
            .with_spectral(SpectralProfile {
                danceability: Some(0.8),
                ..Default::default()
            })
            .unwrap()
    }

    fn test_analysis(tempo: f64) -> TrackAnalysis {
        TrackAnalysis {
            duration: 64.0,
            tempo,
            beats_per_bar: 4,
            beats: vec![0.0, 0.5, 1.0],
            downbeats: vec![0.0],
            energy_curve: EnergyEnvelope {
                sample_rate: 10.0,
                values: vec![0.2, 1.0],
            },
            segments: vec![
                Segment { kind: SegmentType::Intro, start: 0.0, end: 16.0, energy: 0.2, beat_count: 32 },
                Segment { kind: SegmentType::Drop, start: 16.0, end: 64.0, energy: 0.9, beat_count: 96 },
            ],
            mix_in_point: 16.0,
            mix_out_point: 64.0,
            drop_point: Some(16.0),
            breakdown_point: None,
            ideal_crossfade_bars: 8,
        }
    }

    #[test]
    fn test_upsert_and_retrieve() {
        let db = Database::open_in_memory().unwrap();
        let t = test_track("t1");
        db.upsert_track(&t, Some("/music/t1.wav")).unwrap();

        let all = db.get_all_tracks().unwrap();
        assert_eq!(all, vec![t.clone()]);
        assert_eq!(db.get_track("t1").unwrap(), Some(t));
        assert_eq!(db.get_track("missing").unwrap(), None);
    }

    #[test]
    fn test_upsert_is_idempotent_and_keeps_path() {
        let db = Database::open_in_memory().unwrap();
        let mut t = test_track("t1");
        db.upsert_track(&t, Some("/music/t1.wav")).unwrap();
        t.bpm = 125.0;
        db.upsert_track(&t, None).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_tracks, 1);
        assert_eq!(stats.with_audio, 1);
        assert_eq!(db.get_track("t1").unwrap().unwrap().bpm, 125.0);
    }

    #[test]
    fn test_analysis_roundtrip_and_targets() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_track(&test_track("t1"), Some("/music/t1.wav")).unwrap();
        db.upsert_track(&test_track("t2"), None).unwrap();

        let targets = db.get_analysis_targets().unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].file_path, "/music/t1.wav");
        assert_eq!(targets[0].fingerprint, None);

        let analysis = test_analysis(124.0);
        db.store_analysis("t1", "100:200", &analysis).unwrap();
        assert_eq!(db.get_analysis("t1").unwrap(), Some(analysis));
        assert_eq!(db.get_analysis("t2").unwrap(), None);
        assert_eq!(
            db.get_analysis_targets().unwrap()[0].fingerprint.as_deref(),
            Some("100:200")
        );

        let seg_count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM track_segments WHERE track_id = 't1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(seg_count, 2);
    }

    #[test]
    fn test_reanalysis_replaces_segments() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_track(&test_track("t1"), Some("/music/t1.wav")).unwrap();
        db.store_analysis("t1", "a", &test_analysis(124.0)).unwrap();
        let mut second = test_analysis(125.0);
        second.segments.truncate(1);
        db.store_analysis("t1", "b", &second).unwrap();

        assert_eq!(db.get_analysis("t1").unwrap().unwrap().tempo, 125.0);
        let seg_count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM track_segments", [], |r| r.get(0))
            .unwrap();
        assert_eq!(seg_count, 1);
        assert_eq!(db.stats().unwrap().analyzed_tracks, 1);
    }

    #[test]
    fn test_corrupt_key_is_reported() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_track(&test_track("t1"), None).unwrap();
        db.conn
            .execute("UPDATE tracks SET camelot_key = 'H9' WHERE id = 't1'", [])
            .unwrap();
        assert!(matches!(db.get_all_tracks(), Err(crate::db::DbError::Input(_))));
    }

    #[test]
    fn test_stats() {
        let db = Database::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.total_tracks, 0);
        assert_eq!(stats.analyzed_tracks, 0);

        db.upsert_track(&test_track("t1"), None).unwrap();
        db.upsert_track(&test_track("t2"), None).unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.with_genre, 2);
        assert_eq!(stats.with_spectral, 2);
        assert_eq!(stats.keys, vec![("8A".to_string(), 2)]);
        assert_eq!(stats.genres, vec![("detroit techno".to_string(), 2)]);
    }
}
