use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded play of a song (read from the database).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayEvent {
    pub id: i64,
    pub song_id: String,
    pub timestamp: DateTime<Utc>,
    pub play_time_ms: i64,
}

/// Data for appending a play event.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPlayEvent {
    pub song_id: String,
    pub timestamp: DateTime<Utc>,
    pub play_time_ms: i64,
}

/// Artist reference as it appears on a song or album (import and remote data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Data for inserting or updating a song.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSong {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub album_id: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub explicit: bool,
    /// Ordered, primary artist first.
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
}

/// Data for inserting an album. `song_count == 0` marks an album whose
/// track list has not been fetched yet.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAlbum {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub playlist_id: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub song_count: i64,
    #[serde(default)]
    pub duration_secs: i64,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
}

/// JSON document accepted by `listenstats import`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CatalogImport {
    pub albums: Vec<NewAlbum>,
    pub songs: Vec<NewSong>,
    pub events: Vec<NewPlayEvent>,
}

/// A song row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub album_id: Option<String>,
    pub duration_secs: Option<i64>,
    pub is_video: bool,
    pub total_play_time_ms: i64,
}

/// An artist row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub thumbnail_url: Option<String>,
    pub last_update_time: DateTime<Utc>,
}

impl Artist {
    /// Artists backed by a remote channel, as opposed to ids generated
    /// locally for tag-only artists.
    pub fn is_youtube_artist(&self) -> bool {
        is_youtube_artist_id(&self.id)
    }
}

pub fn is_youtube_artist_id(id: &str) -> bool {
    id.starts_with("UC") || id.starts_with("FEmusic_library_privately_owned_artist")
}

/// An album row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: String,
    pub playlist_id: Option<String>,
    pub title: String,
    pub year: Option<i32>,
    pub thumbnail_url: Option<String>,
    pub song_count: i64,
    pub duration_secs: i64,
    pub explicit: bool,
    pub last_update_time: DateTime<Utc>,
}

/// What a ranking groups play events by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Song,
    Artist,
    Album,
}

impl GroupBy {
    pub fn label(self) -> &'static str {
        match self {
            Self::Song => "song",
            Self::Artist => "artist",
            Self::Album => "album",
        }
    }
}

/// A song, artist or album with its play metrics for one range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntity {
    pub group: GroupBy,
    pub id: String,
    pub name: String,
    pub play_count: i64,
    pub time_listened_ms: i64,
    /// Song rankings only; always false for artists and albums.
    #[serde(skip)]
    pub is_video: bool,
}

/// Totals for a range (header of the stats view).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RangeSummary {
    pub total_play_time_ms: i64,
    pub play_count: i64,
    pub unique_songs: i64,
    pub unique_artists: i64,
    pub unique_albums: i64,
}

/// Metadata to merge into an artist row after a successful remote fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistUpdate {
    pub name: String,
    pub thumbnail_url: Option<String>,
}

/// Metadata to merge into an album row after a successful remote fetch.
#[derive(Debug, Clone)]
pub struct AlbumUpdate {
    pub playlist_id: Option<String>,
    pub title: String,
    pub year: Option<i32>,
    pub thumbnail_url: Option<String>,
    pub explicit: bool,
    /// Replaces the album artist links when non-empty.
    pub artists: Vec<ArtistRef>,
    /// Track list in album order.
    pub songs: Vec<NewSong>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_artist_ids() {
        assert!(is_youtube_artist_id("UCabc123"));
        assert!(is_youtube_artist_id("FEmusic_library_privately_owned_artist_x"));
        assert!(!is_youtube_artist_id("LAxk29sd8f"));
        assert!(!is_youtube_artist_id(""));
    }

    #[test]
    fn test_catalog_import_defaults() {
        let json = r#"{
            "songs": [{"id": "s1", "title": "Intro", "artists": [{"id": "UC1", "name": "Band"}]}],
            "events": [{"song_id": "s1", "timestamp": "2026-01-02T03:04:05Z", "play_time_ms": 1000}]
        }"#;
        let import: CatalogImport = serde_json::from_str(json).unwrap();
        assert!(import.albums.is_empty());
        assert_eq!(import.songs[0].artists[0].name, "Band");
        assert!(!import.songs[0].is_video);
        assert_eq!(import.events[0].play_time_ms, 1000);
    }
}
