//! Remote metadata source used to refresh cached artists and albums.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::db::models::{AlbumUpdate, ArtistRef, ArtistUpdate, NewSong};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The entity no longer exists upstream.
    #[error("{0} not found upstream")]
    NotFound(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Parse(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Blocking metadata lookups. Implementations must be shareable across the
/// blocking worker pool.
pub trait MetadataSource: Send + Sync {
    fn fetch_artist(&self, id: &str) -> Result<ArtistMetadata, RemoteError>;
    fn fetch_album(&self, id: &str) -> Result<AlbumMetadata, RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtistMetadata {
    pub name: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl ArtistMetadata {
    pub fn into_update(self) -> ArtistUpdate {
        ArtistUpdate {
            name: self.name,
            thumbnail_url: self.thumbnail_url,
        }
    }
}

/// Artist credit; remote data may omit the id for tag-only artists.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteArtist {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

impl RemoteArtist {
    fn into_ref(self) -> ArtistRef {
        let id = self.id.unwrap_or_else(|| local_artist_id(&self.name));
        ArtistRef {
            id,
            name: self.name,
            thumbnail_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteSong {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub artists: Vec<RemoteArtist>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlbumMetadata {
    pub title: String,
    #[serde(default)]
    pub playlist_id: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub artists: Vec<RemoteArtist>,
    #[serde(default)]
    pub songs: Vec<RemoteSong>,
}

impl AlbumMetadata {
    pub fn into_update(self) -> AlbumUpdate {
        AlbumUpdate {
            playlist_id: self.playlist_id,
            title: self.title,
            year: self.year,
            thumbnail_url: self.thumbnail_url,
            explicit: self.explicit,
            artists: self.artists.into_iter().map(RemoteArtist::into_ref).collect(),
            songs: self
                .songs
                .into_iter()
                .map(|s| NewSong {
                    id: s.id,
                    title: s.title,
                    album_id: None,
                    duration_secs: s.duration_secs,
                    is_video: s.is_video,
                    explicit: s.explicit,
                    artists: s.artists.into_iter().map(RemoteArtist::into_ref).collect(),
                })
                .collect(),
        }
    }
}

/// Stable local id for an artist credited by name only.
pub fn local_artist_id(name: &str) -> String {
    let slug: String = name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    format!("LA{slug}")
}

/// JSON-over-HTTP metadata API: `GET {base}/artists/{id}`, `GET {base}/albums/{id}`.
pub struct HttpMetadataSource {
    base_url: String,
    timeout: Duration,
    agent: ureq::Agent,
}

impl HttpMetadataSource {
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .user_agent(user_agent)
            .http_status_as_error(false)
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, kind: &str, id: &str) -> Result<T, RemoteError> {
        let url = format!("{}/{kind}/{}", self.base_url, encode_segment(id));
        log::debug!("Fetching {url}");

        let mut resp = self.agent.get(&url).call().map_err(|err| match err {
            ureq::Error::Timeout(_) => RemoteError::Timeout(self.timeout),
            other => RemoteError::Transport(format!("{url}: {other}")),
        })?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp
                .into_body()
                .with_config()
                .limit(64 * 1024)
                .read_to_string()
                .unwrap_or_default();
            return Err(classify_status(id, status, &body));
        }

        resp.body_mut()
            .read_json::<T>()
            .map_err(|e| RemoteError::Parse(format!("{url}: {e}")))
    }
}

impl MetadataSource for HttpMetadataSource {
    fn fetch_artist(&self, id: &str) -> Result<ArtistMetadata, RemoteError> {
        self.get_json("artists", id)
    }

    fn fetch_album(&self, id: &str) -> Result<AlbumMetadata, RemoteError> {
        self.get_json("albums", id)
    }
}

/// Map an error status to a [`RemoteError`]. Upstreams report removed
/// entities either as 404 or with a `NOT_FOUND` status in the body.
fn classify_status(id: &str, status: u16, body: &str) -> RemoteError {
    if status == 404 || body.contains("NOT_FOUND") {
        return RemoteError::NotFound(id.to_string());
    }
    let trimmed = body.trim();
    let mut snippet: String = trimmed.chars().take(300).collect();
    if trimmed.chars().count() > 300 {
        snippet.push_str("...");
    }
    RemoteError::Http {
        status,
        body: snippet,
    }
}

/// Percent-encode everything outside the URL path-segment unreserved set.
fn encode_segment(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
