pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

use crate::error::InputError;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid stored value: {0}")]
    Input(#[from] InputError),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: library tracks, one analysis record per track, and its segments
    /// as rows for querying structure without decoding JSON
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tracks (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                artists         TEXT NOT NULL DEFAULT '[]',  -- JSON array
                bpm             REAL NOT NULL,
                camelot_key     TEXT NOT NULL,
                energy          REAL NOT NULL,
                genre           TEXT,
                duration_secs   REAL,
                spectral        TEXT,                        -- JSON object
                file_path       TEXT,

                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_tracks_key ON tracks(camelot_key);
            CREATE INDEX IF NOT EXISTS idx_tracks_bpm ON tracks(bpm);

            CREATE TABLE IF NOT EXISTS track_analysis (
                track_id        TEXT PRIMARY KEY REFERENCES tracks(id) ON DELETE CASCADE,
                -- source file size + mtime when analyzed
                fingerprint     TEXT NOT NULL,

                duration        REAL NOT NULL,
                tempo           REAL NOT NULL,
                mix_in_point    REAL NOT NULL,
                mix_out_point   REAL NOT NULL,
                drop_point      REAL,
                breakdown_point REAL,
                crossfade_bars  INTEGER NOT NULL,

                -- full record: beats, downbeats, energy curve, segments
                analysis_json   TEXT NOT NULL,
                analyzed_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS track_segments (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id        TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                segment_index   INTEGER NOT NULL,
                kind            TEXT NOT NULL,
                start_time      REAL NOT NULL,
                end_time        REAL NOT NULL,
                energy          REAL NOT NULL,
                beat_count      INTEGER NOT NULL,
                UNIQUE(track_id, segment_index)
            );

            CREATE INDEX IF NOT EXISTS idx_segments_kind ON track_segments(kind);
            ",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let version: i32 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);

        let tables: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('tracks', 'track_analysis', 'track_segments')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
