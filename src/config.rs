use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::reconcile::ReconcilePolicy;

/// Application configuration loaded from TOML config file.
/// All fields have defaults, so the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Remote metadata source.
    pub remote: RemoteConfig,
    /// Metadata reconciliation thresholds.
    pub reconcile: ReconcileConfig,
    /// Initial values for the stats preferences.
    pub preferences: StatsPreferences,
}

/// Remote metadata API settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL serving `/artists/{id}` and `/albums/{id}`. Unset disables
    /// reconciliation.
    pub base_url: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 10,
            user_agent: format!("{}/{}", crate::APP_NAME, env!("CARGO_PKG_VERSION")),
        }
    }
}

/// When cached entities count as stale.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Artists older than this are refetched even with a thumbnail.
    pub artist_stale_days: i64,
    /// Upper bound on one fetch, including time spent queued.
    pub fetch_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            artist_stale_days: 10,
            fetch_timeout_secs: 15,
        }
    }
}

impl ReconcileConfig {
    pub fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            artist_stale_after: chrono::Duration::days(self.artist_stale_days.max(0)),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
        }
    }
}

/// User preferences that shape the stats views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsPreferences {
    pub hide_video_songs: bool,
    pub youtube_artists_only: bool,
}

impl Default for StatsPreferences {
    fn default() -> Self {
        Self {
            hide_video_songs: false,
            youtube_artists_only: true,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/listenstats/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("listenstats.db")
    } else {
        // Fallback: current directory
        PathBuf::from("listenstats.db")
    }
}

/// Shared, observable preferences.
///
/// Handed to whoever needs them instead of being read from a global; every
/// change is published to subscribers.
#[derive(Clone)]
pub struct Preferences {
    sender: Arc<watch::Sender<StatsPreferences>>,
}

impl Preferences {
    pub fn new(initial: StatsPreferences) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn get(&self) -> StatsPreferences {
        self.sender.borrow().clone()
    }

    /// Replace all preferences. Subscribers are only woken on an actual change.
    pub fn set(&self, prefs: StatsPreferences) {
        self.update(|current| *current = prefs);
    }

    pub fn update(&self, f: impl FnOnce(&mut StatsPreferences)) {
        self.sender.send_if_modified(|current| {
            let before = current.clone();
            f(current);
            *current != before
        });
    }

    pub fn set_hide_video_songs(&self, hide: bool) {
        self.update(|p| p.hide_video_songs = hide);
    }

    pub fn set_youtube_artists_only(&self, only: bool) {
        self.update(|p| p.youtube_artists_only = only);
    }

    pub fn subscribe(&self) -> watch::Receiver<StatsPreferences> {
        self.sender.subscribe()
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self::new(StatsPreferences::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.db_path.is_none());
        assert!(config.remote.base_url.is_none());
        assert_eq!(config.reconcile.artist_stale_days, 10);
        assert!(config.preferences.youtube_artists_only);
    }

    #[test]
    fn test_config_partial_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            [remote]
            base_url = "http://localhost:9000/api"

            [reconcile]
            artist_stale_days = 3

            [preferences]
            hide_video_songs = true
            "#,
        )
        .unwrap();
        assert_eq!(config.remote.base_url.as_deref(), Some("http://localhost:9000/api"));
        assert_eq!(config.remote.timeout_secs, 10);
        let policy = config.reconcile.policy();
        assert_eq!(policy.artist_stale_after, chrono::Duration::days(3));
        assert_eq!(policy.fetch_timeout, Duration::from_secs(15));
        assert!(config.preferences.hide_video_songs);
        assert!(config.preferences.youtube_artists_only);
    }

    #[test]
    fn test_preferences_notify_only_on_change() {
        let prefs = Preferences::default();
        let mut rx = prefs.subscribe();
        assert!(!rx.has_changed().unwrap());

        prefs.set_youtube_artists_only(true);
        assert!(!rx.has_changed().unwrap());

        prefs.set_hide_video_songs(true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().hide_video_songs);
        assert!(prefs.get().hide_video_songs);
    }
}
