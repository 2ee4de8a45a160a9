use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{
    Album, AlbumUpdate, Artist, ArtistRef, ArtistUpdate, CatalogImport, GroupBy, NewAlbum,
    NewPlayEvent, NewSong, PlayEvent, RangeSummary, RankedEntity, Song,
};
use super::{Database, DbError, Result};
use crate::period::TimeRange;

/// Counts written by [`Database::import_catalog`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub albums: usize,
    pub songs: usize,
    pub events: usize,
}

fn millis_to_utc(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn sql_limit(limit: Option<usize>) -> i64 {
    // SQLite treats a negative LIMIT as unbounded
    limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX))
}

impl Database {
    // --- Event store ---

    /// Append a play event and add its play time to the song's lifetime total.
    pub fn insert_event(&self, event: &NewPlayEvent) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let id = Self::insert_event_row(&tx, event)?;
        tx.commit()?;
        Ok(id)
    }

    fn insert_event_row(conn: &Connection, event: &NewPlayEvent) -> Result<i64> {
        conn.execute(
            "INSERT INTO event (song_id, timestamp, play_time) VALUES (?1, ?2, ?3)",
            params![event.song_id, event.timestamp.timestamp_millis(), event.play_time_ms],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE song SET total_play_time_ms = total_play_time_ms + ?2 WHERE id = ?1",
            params![event.song_id, event.play_time_ms],
        )?;
        Ok(id)
    }

    /// Events with `from <= timestamp < to`, oldest first.
    pub fn query_events(&self, range: &TimeRange) -> Result<Vec<PlayEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, song_id, timestamp, play_time
             FROM event
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp, id",
        )?;

        let events = stmt
            .query_map(params![range.from_millis(), range.to_millis()], |row| {
                Ok(PlayEvent {
                    id: row.get(0)?,
                    song_id: row.get(1)?,
                    timestamp: millis_to_utc(2, row.get(2)?)?,
                    play_time_ms: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Timestamp of the earliest recorded play, `None` with no history.
    pub fn first_event_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        let ms: Option<i64> =
            self.conn
                .query_row("SELECT MIN(timestamp) FROM event", [], |row| row.get(0))?;
        ms.map(|ms| DateTime::from_timestamp_millis(ms).ok_or(DbError::InvalidTimestamp(ms)))
            .transpose()
    }

    /// Clear listening history. Returns the number of events removed.
    pub fn delete_all_events(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM event", [])?)
    }

    // --- Entity cache ---

    /// Insert or update a song together with its artist links.
    pub fn upsert_song(&self, song: &NewSong, now: DateTime<Utc>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        Self::upsert_song_row(&tx, song, now)?;
        tx.commit()?;
        Ok(())
    }

    fn upsert_song_row(conn: &Connection, song: &NewSong, now: DateTime<Utc>) -> Result<()> {
        conn.execute(
            "INSERT INTO song (id, title, album_id, duration_secs, is_video, explicit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                album_id = COALESCE(excluded.album_id, song.album_id),
                duration_secs = COALESCE(excluded.duration_secs, song.duration_secs),
                is_video = excluded.is_video,
                explicit = excluded.explicit",
            params![
                song.id, song.title, song.album_id, song.duration_secs, song.is_video, song.explicit,
            ],
        )?;

        if !song.artists.is_empty() {
            conn.execute("DELETE FROM song_artist_map WHERE song_id = ?1", params![song.id])?;
            let mut map_stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO song_artist_map (song_id, artist_id, position)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (position, artist) in song.artists.iter().enumerate() {
                Self::insert_artist_if_missing(conn, artist, now)?;
                map_stmt.execute(params![song.id, artist.id, position as i64])?;
            }
        }

        if let Some(album_id) = &song.album_id {
            // Link only to albums we already know; the reconciler fills the rest
            conn.execute(
                "INSERT OR IGNORE INTO song_album_map (song_id, album_id, position)
                 SELECT ?1, id, (SELECT COUNT(*) FROM song_album_map WHERE album_id = ?2)
                 FROM album WHERE id = ?2",
                params![song.id, album_id],
            )?;
        }
        Ok(())
    }

    fn insert_artist_if_missing(conn: &Connection, artist: &ArtistRef, now: DateTime<Utc>) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO artist (id, name, thumbnail_url, last_update_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![artist.id, artist.name, artist.thumbnail_url, now.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Insert or update an album row and its artist links.
    pub fn upsert_album(&self, album: &NewAlbum, now: DateTime<Utc>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        Self::upsert_album_row(&tx, album, now)?;
        tx.commit()?;
        Ok(())
    }

    fn upsert_album_row(conn: &Connection, album: &NewAlbum, now: DateTime<Utc>) -> Result<()> {
        conn.execute(
            "INSERT INTO album (
                id, playlist_id, title, year, thumbnail_url,
                song_count, duration_secs, explicit, last_update_time
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                playlist_id = excluded.playlist_id,
                title = excluded.title,
                year = excluded.year,
                thumbnail_url = excluded.thumbnail_url,
                song_count = excluded.song_count,
                duration_secs = excluded.duration_secs,
                explicit = excluded.explicit",
            params![
                album.id, album.playlist_id, album.title, album.year, album.thumbnail_url,
                album.song_count, album.duration_secs, album.explicit, now.timestamp_millis(),
            ],
        )?;
        if !album.artists.is_empty() {
            Self::replace_album_artists(conn, &album.id, &album.artists, now)?;
        }
        Ok(())
    }

    fn replace_album_artists(
        conn: &Connection,
        album_id: &str,
        artists: &[ArtistRef],
        now: DateTime<Utc>,
    ) -> Result<()> {
        conn.execute("DELETE FROM album_artist_map WHERE album_id = ?1", params![album_id])?;
        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO album_artist_map (album_id, artist_id, position)
             VALUES (?1, ?2, ?3)",
        )?;
        for (position, artist) in artists.iter().enumerate() {
            Self::insert_artist_if_missing(conn, artist, now)?;
            stmt.execute(params![album_id, artist.id, position as i64])?;
        }
        Ok(())
    }

    /// Load albums, then songs, then events in one transaction.
    pub fn import_catalog(&self, import: &CatalogImport, now: DateTime<Utc>) -> Result<ImportResult> {
        let tx = self.conn.unchecked_transaction()?;
        for album in &import.albums {
            Self::upsert_album_row(&tx, album, now)?;
        }
        for song in &import.songs {
            Self::upsert_song_row(&tx, song, now)?;
        }
        for event in &import.events {
            Self::insert_event_row(&tx, event)?;
        }
        tx.commit()?;

        Ok(ImportResult {
            albums: import.albums.len(),
            songs: import.songs.len(),
            events: import.events.len(),
        })
    }

    pub fn get_song(&self, id: &str) -> Result<Option<Song>> {
        let song = self
            .conn
            .query_row(
                "SELECT id, title, album_id, duration_secs, is_video, total_play_time_ms
                 FROM song WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Song {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        album_id: row.get(2)?,
                        duration_secs: row.get(3)?,
                        is_video: row.get(4)?,
                        total_play_time_ms: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(song)
    }

    pub fn get_artist(&self, id: &str) -> Result<Option<Artist>> {
        let artist = self
            .conn
            .query_row(
                "SELECT id, name, thumbnail_url, last_update_time
                 FROM artist WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Artist {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        thumbnail_url: row.get(2)?,
                        last_update_time: millis_to_utc(3, row.get(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(artist)
    }

    pub fn get_album(&self, id: &str) -> Result<Option<Album>> {
        let album = self
            .conn
            .query_row(
                "SELECT id, playlist_id, title, year, thumbnail_url,
                        song_count, duration_secs, explicit, last_update_time
                 FROM album WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Album {
                        id: row.get(0)?,
                        playlist_id: row.get(1)?,
                        title: row.get(2)?,
                        year: row.get(3)?,
                        thumbnail_url: row.get(4)?,
                        song_count: row.get(5)?,
                        duration_secs: row.get(6)?,
                        explicit: row.get(7)?,
                        last_update_time: millis_to_utc(8, row.get(8)?)?,
                    })
                },
            )
            .optional()?;
        Ok(album)
    }

    /// Artist ids credited on an album, in credit order.
    pub fn album_artist_ids(&self, album_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT artist_id FROM album_artist_map WHERE album_id = ?1 ORDER BY position",
        )?;
        let ids = stmt
            .query_map(params![album_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Song ids of an album, in track order.
    pub fn album_song_ids(&self, album_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT song_id FROM song_album_map WHERE album_id = ?1 ORDER BY position",
        )?;
        let ids = stmt
            .query_map(params![album_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Merge refreshed artist metadata. Returns false if the artist is gone.
    pub fn update_artist(&self, id: &str, update: &ArtistUpdate, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE artist SET name = ?2, thumbnail_url = ?3, last_update_time = ?4 WHERE id = ?1",
            params![id, update.name, update.thumbnail_url, now.timestamp_millis()],
        )?;
        Ok(changed > 0)
    }

    /// Merge a refreshed album: row fields, track list and (when reported)
    /// album artists. Returns false if the album is gone.
    pub fn update_album(&self, id: &str, update: &AlbumUpdate, now: DateTime<Utc>) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;

        let song_count = update.songs.len() as i64;
        let duration: i64 = update.songs.iter().filter_map(|s| s.duration_secs).sum();
        let explicit = update.explicit || update.songs.iter().any(|s| s.explicit);

        let changed = tx.execute(
            "UPDATE album SET
                playlist_id = ?2, title = ?3, year = ?4, thumbnail_url = ?5,
                song_count = ?6, duration_secs = ?7, explicit = ?8, last_update_time = ?9
             WHERE id = ?1",
            params![
                id, update.playlist_id, update.title, update.year, update.thumbnail_url,
                song_count, duration, explicit, now.timestamp_millis(),
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        // Upsert only: locally linked songs missing from the remote list keep their link
        {
            let mut map_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO song_album_map (song_id, album_id, position)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (position, song) in update.songs.iter().enumerate() {
                let song = NewSong {
                    album_id: Some(id.to_string()),
                    ..song.clone()
                };
                Self::upsert_song_row(&tx, &song, now)?;
                map_stmt.execute(params![song.id, id, position as i64])?;
            }
        }

        if !update.artists.is_empty() {
            Self::replace_album_artists(&tx, id, &update.artists, now)?;
        }

        tx.commit()?;
        Ok(true)
    }

    /// Delete an artist and its song/album links.
    pub fn delete_artist(&self, id: &str) -> Result<bool> {
        Ok(self.conn.execute("DELETE FROM artist WHERE id = ?1", params![id])? > 0)
    }

    /// Delete an album and its song/artist links. Songs stay in the cache.
    pub fn delete_album(&self, id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("UPDATE song SET album_id = NULL WHERE album_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM album WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // --- Rankings ---

    /// Rank entities by plays within `range`.
    ///
    /// Order: play count, then time listened (both descending), then id.
    pub fn most_played(
        &self,
        range: &TimeRange,
        group_by: GroupBy,
        limit: Option<usize>,
    ) -> Result<Vec<RankedEntity>> {
        let sql = match group_by {
            GroupBy::Song => {
                "SELECT s.id, s.title, s.is_video, COUNT(*) AS plays,
                        COALESCE(SUM(e.play_time), 0) AS listened
                 FROM event e
                 JOIN song s ON s.id = e.song_id
                 WHERE e.timestamp >= ?1 AND e.timestamp < ?2
                 GROUP BY s.id
                 ORDER BY plays DESC, listened DESC, s.id ASC
                 LIMIT ?3"
            }
            GroupBy::Artist => {
                "SELECT a.id, a.name, 0, COUNT(*) AS plays,
                        COALESCE(SUM(e.play_time), 0) AS listened
                 FROM event e
                 JOIN song_artist_map m ON m.song_id = e.song_id
                 JOIN artist a ON a.id = m.artist_id
                 WHERE e.timestamp >= ?1 AND e.timestamp < ?2
                 GROUP BY a.id
                 ORDER BY plays DESC, listened DESC, a.id ASC
                 LIMIT ?3"
            }
            GroupBy::Album => {
                "SELECT al.id, al.title, 0, COUNT(*) AS plays,
                        COALESCE(SUM(e.play_time), 0) AS listened
                 FROM event e
                 JOIN song_album_map m ON m.song_id = e.song_id
                 JOIN album al ON al.id = m.album_id
                 WHERE e.timestamp >= ?1 AND e.timestamp < ?2
                 GROUP BY al.id
                 ORDER BY plays DESC, listened DESC, al.id ASC
                 LIMIT ?3"
            }
        };

        let mut stmt = self.conn.prepare_cached(sql)?;
        let ranked = stmt
            .query_map(
                params![range.from_millis(), range.to_millis(), sql_limit(limit)],
                |row| {
                    Ok(RankedEntity {
                        group: group_by,
                        id: row.get(0)?,
                        name: row.get(1)?,
                        is_video: row.get(2)?,
                        play_count: row.get(3)?,
                        time_listened_ms: row.get(4)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ranked)
    }

    /// Totals and distinct counts for `range`.
    pub fn range_summary(&self, range: &TimeRange) -> Result<RangeSummary> {
        let (from, to) = (range.from_millis(), range.to_millis());

        let (total_play_time_ms, play_count, unique_songs) = self.conn.query_row(
            "SELECT COALESCE(SUM(play_time), 0), COUNT(*), COUNT(DISTINCT song_id)
             FROM event WHERE timestamp >= ?1 AND timestamp < ?2",
            params![from, to],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let unique_artists: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT m.artist_id)
             FROM event e JOIN song_artist_map m ON m.song_id = e.song_id
             WHERE e.timestamp >= ?1 AND e.timestamp < ?2",
            params![from, to],
            |row| row.get(0),
        )?;

        let unique_albums: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT m.album_id)
             FROM event e JOIN song_album_map m ON m.song_id = e.song_id
             WHERE e.timestamp >= ?1 AND e.timestamp < ?2",
            params![from, to],
            |row| row.get(0),
        )?;

        Ok(RangeSummary {
            total_play_time_ms,
            play_count,
            unique_songs,
            unique_artists,
            unique_albums,
        })
    }
}
