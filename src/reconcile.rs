//! Refresh stale cached artists and albums from the remote metadata source.
//!
//! Each entity goes through: check freshness, fetch if stale, then merge on
//! success, delete on `NotFound`, or keep the cached row on any other error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::models::{Album, Artist, GroupBy, RankedEntity};
use crate::remote::{MetadataSource, RemoteError};
use crate::store::SharedStore;

/// Staleness thresholds. Loaded from the `[reconcile]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub artist_stale_after: chrono::Duration,
    pub fetch_timeout: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            artist_stale_after: chrono::Duration::days(10),
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

impl ReconcilePolicy {
    /// An artist is stale without a thumbnail or once its last refresh is
    /// older than `artist_stale_after`.
    pub fn artist_freshness(&self, artist: &Artist, now: DateTime<Utc>) -> Freshness {
        if artist.thumbnail_url.is_none() || now - artist.last_update_time > self.artist_stale_after {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    /// An album is stale until its track list has been loaded.
    pub fn album_freshness(&self, album: &Album) -> Freshness {
        if album.song_count == 0 {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Fetched and merged.
    Refreshed,
    /// Gone upstream; removed from the cache.
    Deleted,
    /// Fetch or merge failed; cached row left as it was.
    Failed,
    SkippedFresh,
    /// No cached row for the id (e.g. deleted since the ranking was built).
    Missing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub refreshed: usize,
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn record(&mut self, outcome: ReconcileOutcome) {
        self.checked += 1;
        match outcome {
            ReconcileOutcome::Refreshed => self.refreshed += 1,
            ReconcileOutcome::Deleted => self.deleted += 1,
            ReconcileOutcome::Failed => self.failed += 1,
            ReconcileOutcome::SkippedFresh | ReconcileOutcome::Missing => self.skipped += 1,
        }
    }

    /// Whether the pass wrote anything to the store.
    pub fn changed_store(&self) -> bool {
        self.refreshed > 0 || self.deleted > 0
    }
}

pub struct Reconciler {
    store: SharedStore,
    source: Arc<dyn MetadataSource>,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(store: SharedStore, source: Arc<dyn MetadataSource>, policy: ReconcilePolicy) -> Self {
        Self {
            store,
            source,
            policy,
        }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Reconcile every artist or album in a ranked list, one at a time.
    /// Song rankings have nothing to reconcile.
    pub async fn run_pass(&self, ranked: &[RankedEntity], now: DateTime<Utc>) -> ReconcileReport {
        self.run_pass_with(ranked, now, |_, _| {}).await
    }

    /// Like [`Reconciler::run_pass`], calling `on_entity` after each entity.
    pub async fn run_pass_with<F>(
        &self,
        ranked: &[RankedEntity],
        now: DateTime<Utc>,
        mut on_entity: F,
    ) -> ReconcileReport
    where
        F: FnMut(&RankedEntity, ReconcileOutcome),
    {
        let mut report = ReconcileReport::default();
        for entity in ranked {
            let outcome = match entity.group {
                GroupBy::Artist => self.reconcile_artist(&entity.id, now).await,
                GroupBy::Album => self.reconcile_album(&entity.id, now).await,
                GroupBy::Song => continue,
            };
            report.record(outcome);
            on_entity(entity, outcome);
        }
        if report.checked > 0 {
            log::info!(
                "Reconciled {} entities: {} refreshed, {} deleted, {} failed, {} skipped",
                report.checked,
                report.refreshed,
                report.deleted,
                report.failed,
                report.skipped
            );
        }
        report
    }

    pub async fn reconcile_artists(&self, ids: &[String], now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for id in ids {
            report.record(self.reconcile_artist(id, now).await);
        }
        report
    }

    pub async fn reconcile_albums(&self, ids: &[String], now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for id in ids {
            report.record(self.reconcile_album(id, now).await);
        }
        report
    }

    pub async fn reconcile_artist(&self, id: &str, now: DateTime<Utc>) -> ReconcileOutcome {
        let key = id.to_string();
        let artist = match self.store.read_async(move |db| db.get_artist(&key)).await {
            Ok(Some(artist)) => artist,
            Ok(None) => return ReconcileOutcome::Missing,
            Err(e) => {
                log::warn!("Failed to load artist {id}: {e}");
                return ReconcileOutcome::Failed;
            }
        };
        if self.policy.artist_freshness(&artist, now) == Freshness::Fresh {
            return ReconcileOutcome::SkippedFresh;
        }

        log::debug!("Refreshing artist {id} ({})", artist.name);
        match self.fetch(id, |source, id| source.fetch_artist(id)).await {
            Ok(meta) => {
                let key = id.to_string();
                let update = meta.into_update();
                let merged = self
                    .store
                    .write_async(move |db| db.update_artist(&key, &update, now))
                    .await;
                merged_outcome("artist", id, merged)
            }
            Err(e) if e.is_not_found() => {
                let key = id.to_string();
                let deleted = self.store.write_async(move |db| db.delete_artist(&key)).await;
                deleted_outcome("artist", id, deleted)
            }
            Err(e) => {
                log::warn!("Failed to refresh artist {id}: {e}");
                ReconcileOutcome::Failed
            }
        }
    }

    pub async fn reconcile_album(&self, id: &str, now: DateTime<Utc>) -> ReconcileOutcome {
        let key = id.to_string();
        let album = match self.store.read_async(move |db| db.get_album(&key)).await {
            Ok(Some(album)) => album,
            Ok(None) => return ReconcileOutcome::Missing,
            Err(e) => {
                log::warn!("Failed to load album {id}: {e}");
                return ReconcileOutcome::Failed;
            }
        };
        if self.policy.album_freshness(&album) == Freshness::Fresh {
            return ReconcileOutcome::SkippedFresh;
        }

        log::debug!("Refreshing album {id} ({})", album.title);
        match self.fetch(id, |source, id| source.fetch_album(id)).await {
            Ok(meta) => {
                let key = id.to_string();
                let update = meta.into_update();
                let merged = self
                    .store
                    .write_async(move |db| db.update_album(&key, &update, now))
                    .await;
                merged_outcome("album", id, merged)
            }
            Err(e) if e.is_not_found() => {
                let key = id.to_string();
                let deleted = self.store.write_async(move |db| db.delete_album(&key)).await;
                deleted_outcome("album", id, deleted)
            }
            Err(e) => {
                log::warn!("Failed to refresh album {id}: {e}");
                ReconcileOutcome::Failed
            }
        }
    }

    /// Run a blocking fetch on the worker pool, bounded by the policy timeout.
    async fn fetch<T, F>(&self, id: &str, f: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MetadataSource, &str) -> Result<T, RemoteError> + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        let id = id.to_string();
        let task = tokio::task::spawn_blocking(move || f(source.as_ref(), &id));
        match tokio::time::timeout(self.policy.fetch_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RemoteError::Transport(format!("fetch task failed: {e}"))),
            Err(_) => Err(RemoteError::Timeout(self.policy.fetch_timeout)),
        }
    }
}

fn merged_outcome(kind: &str, id: &str, merged: crate::db::Result<bool>) -> ReconcileOutcome {
    match merged {
        Ok(true) => ReconcileOutcome::Refreshed,
        Ok(false) => ReconcileOutcome::Missing,
        Err(e) => {
            log::warn!("Failed to store refreshed {kind} {id}: {e}");
            ReconcileOutcome::Failed
        }
    }
}

fn deleted_outcome(kind: &str, id: &str, deleted: crate::db::Result<bool>) -> ReconcileOutcome {
    match deleted {
        Ok(true) => {
            log::info!("Removed {kind} {id}: no longer available upstream");
            ReconcileOutcome::Deleted
        }
        Ok(false) => ReconcileOutcome::Missing,
        Err(e) => {
            log::warn!("Failed to delete {kind} {id}: {e}");
            ReconcileOutcome::Failed
        }
    }
}
