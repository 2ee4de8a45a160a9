pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Timestamp out of range: {0} ms")]
    InvalidTimestamp(i64),
    #[error("Database task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub const SCHEMA_VERSION: i32 = 1;

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
        // WAL keeps readers off the writer's lock
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

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: entity cache (songs, artists, albums + link tables) and play events
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS song (
                id                  TEXT PRIMARY KEY,
                title               TEXT NOT NULL,
                album_id            TEXT,
                duration_secs       INTEGER,
                is_video            INTEGER NOT NULL DEFAULT 0,
                explicit            INTEGER NOT NULL DEFAULT 0,
                total_play_time_ms  INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS artist (
                id                  TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                thumbnail_url       TEXT,
                last_update_time    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS album (
                id                  TEXT PRIMARY KEY,
                playlist_id         TEXT,
                title               TEXT NOT NULL,
                year                INTEGER,
                thumbnail_url       TEXT,
                song_count          INTEGER NOT NULL DEFAULT 0,
                duration_secs       INTEGER NOT NULL DEFAULT 0,
                explicit            INTEGER NOT NULL DEFAULT 0,
                last_update_time    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS song_artist_map (
                song_id     TEXT NOT NULL REFERENCES song(id) ON DELETE CASCADE,
                artist_id   TEXT NOT NULL REFERENCES artist(id) ON DELETE CASCADE,
                position    INTEGER NOT NULL,
                PRIMARY KEY (song_id, artist_id)
            );
            CREATE INDEX IF NOT EXISTS idx_song_artist_artist ON song_artist_map(artist_id);

            CREATE TABLE IF NOT EXISTS song_album_map (
                song_id     TEXT NOT NULL REFERENCES song(id) ON DELETE CASCADE,
                album_id    TEXT NOT NULL REFERENCES album(id) ON DELETE CASCADE,
                position    INTEGER NOT NULL,
                PRIMARY KEY (song_id, album_id)
            );
            CREATE INDEX IF NOT EXISTS idx_song_album_album ON song_album_map(album_id);

            CREATE TABLE IF NOT EXISTS album_artist_map (
                album_id    TEXT NOT NULL REFERENCES album(id) ON DELETE CASCADE,
                artist_id   TEXT NOT NULL REFERENCES artist(id) ON DELETE CASCADE,
                position    INTEGER NOT NULL,
                PRIMARY KEY (album_id, artist_id)
            );

            -- Append-only listening history
            CREATE TABLE IF NOT EXISTS event (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                song_id     TEXT NOT NULL REFERENCES song(id) ON DELETE CASCADE,
                timestamp   INTEGER NOT NULL,
                play_time   INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_event_timestamp ON event(timestamp);
            CREATE INDEX IF NOT EXISTS idx_event_song ON event(song_id);
            ",
        )?;
        Ok(())
    }
}
