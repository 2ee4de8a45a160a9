//! Long-running stats view: keeps a ranked list current as the selection,
//! the preferences and the store change.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Preferences;
use crate::db::models::{GroupBy, RankedEntity};
use crate::period::{Selection, StatMode};
use crate::reconcile::Reconciler;
use crate::stats::{self, AggregateOptions};
use crate::store::SharedStore;

/// Source of "now" for resolving periods.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A computed ranking and the selection it was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedList {
    pub selection: Selection,
    pub entries: Vec<RankedEntity>,
}

pub struct StatsService {
    selection: watch::Sender<Selection>,
    ranked: watch::Receiver<Option<RankedList>>,
    task: JoinHandle<()>,
}

impl StatsService {
    /// Start the view task. The first ranking (continuous mode, index 0) is
    /// computed immediately.
    pub fn spawn(store: SharedStore, preferences: Preferences, group_by: GroupBy, clock: Clock) -> Self {
        let (selection, selection_rx) = watch::channel(Selection::default());
        let (ranked_tx, ranked) = watch::channel(None);
        let task = tokio::spawn(run(
            store,
            preferences,
            group_by,
            clock,
            selection_rx,
            ranked_tx,
        ));
        Self {
            selection,
            ranked,
            task,
        }
    }

    /// Request a new selection. A ranking still being computed for an older
    /// selection is discarded.
    pub fn select(&self, mode: StatMode, index: usize) {
        self.selection.send_replace(Selection::new(mode, index));
    }

    pub fn selection(&self) -> Selection {
        *self.selection.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RankedList>> {
        self.ranked.clone()
    }

    /// Latest published ranking; `None` until the first one is ready.
    pub fn current(&self) -> Option<RankedList> {
        self.ranked.borrow().clone()
    }

    /// Stop the view task and wait for it to exit.
    pub async fn shutdown(self) {
        let Self { selection, task, .. } = self;
        drop(selection);
        if let Err(e) = task.await {
            log::warn!("Stats view task ended abnormally: {e}");
        }
    }
}

async fn run(
    store: SharedStore,
    preferences: Preferences,
    group_by: GroupBy,
    clock: Clock,
    mut selection_rx: watch::Receiver<Selection>,
    ranked_tx: watch::Sender<Option<RankedList>>,
) {
    let mut prefs_rx = preferences.subscribe();
    let mut store_rx = store.subscribe();

    loop {
        let selection = *selection_rx.borrow_and_update();
        let options = AggregateOptions::from_preferences(&prefs_rx.borrow_and_update());
        store_rx.borrow_and_update();
        let now = clock();

        let work = store.read_async(move |db| {
            stats::aggregate_selection(db, selection, now, group_by, &options)
        });

        tokio::select! {
            biased;
            changed = selection_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                log::debug!("Selection changed, dropping ranking for {selection:?}");
                continue;
            }
            changed = prefs_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            result = work => match result {
                Ok(entries) => {
                    let list = RankedList { selection, entries };
                    ranked_tx.send_if_modified(|current| {
                        if current.as_ref() == Some(&list) {
                            false
                        } else {
                            *current = Some(list);
                            true
                        }
                    });
                }
                Err(e) => log::warn!("Failed to rank {} for {selection:?}: {e}", group_by.label()),
            },
        }

        tokio::select! {
            changed = selection_rx.changed() => if changed.is_err() { break },
            changed = prefs_rx.changed() => if changed.is_err() { break },
            changed = store_rx.changed() => if changed.is_err() { break },
        }
    }
    log::debug!("Stats view for {} stopped", group_by.label());
}

/// Run a reconciliation pass over every ranking the view publishes.
///
/// Passes never overlap; rankings published during a pass collapse into the
/// latest one. Ends when the view shuts down.
pub fn spawn_reconciliation(
    mut ranked: watch::Receiver<Option<RankedList>>,
    reconciler: Arc<Reconciler>,
    clock: Clock,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let latest = ranked.borrow_and_update().clone();
            if let Some(list) = latest {
                reconciler.run_pass(&list.entries, clock()).await;
            }
            if ranked.changed().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatsPreferences;
    use crate::db::models::{ArtistRef, NewPlayEvent, NewSong};
    use crate::db::Database;
    use crate::reconcile::ReconcilePolicy;
    use crate::remote::{AlbumMetadata, ArtistMetadata, MetadataSource, RemoteError};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
    }

    fn fixed_clock() -> Clock {
        Arc::new(now)
    }

    fn seeded_store() -> SharedStore {
        let db = Database::open_in_memory().unwrap();
        for (id, artist, is_video) in [("a", "UCone", false), ("b", "UCtwo", false), ("v", "UCone", true)] {
            db.upsert_song(
                &NewSong {
                    id: id.into(),
                    title: id.to_uppercase(),
                    album_id: None,
                    duration_secs: Some(200),
                    is_video,
                    explicit: false,
                    artists: vec![ArtistRef {
                        id: artist.into(),
                        name: artist.into(),
                        thumbnail_url: None,
                    }],
                },
                now() - Duration::days(30),
            )
            .unwrap();
        }
        SharedStore::new(db)
    }

    fn play(store: &SharedStore, song_id: &str, at: DateTime<Utc>) {
        store
            .write(|db| {
                db.insert_event(&NewPlayEvent {
                    song_id: song_id.into(),
                    timestamp: at,
                    play_time_ms: 30_000,
                })
            })
            .unwrap();
    }

    async fn wait_for(
        rx: &mut watch::Receiver<Option<RankedList>>,
        pred: impl FnMut(&Option<RankedList>) -> bool,
    ) -> RankedList {
        let list = tokio::time::timeout(std::time::Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out waiting for ranking")
            .expect("view stopped");
        (*list).clone().expect("no ranking published")
    }

    fn ids(list: &RankedList) -> Vec<&str> {
        list.entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_initial_ranking_published() {
        let store = seeded_store();
        play(&store, "a", now() - Duration::hours(2));
        play(&store, "a", now() - Duration::hours(1));
        play(&store, "b", now() - Duration::days(20));

        let service = StatsService::spawn(store, Preferences::default(), GroupBy::Song, fixed_clock());
        let mut rx = service.subscribe();
        let list = wait_for(&mut rx, |l| l.is_some()).await;
        assert_eq!(list.selection, Selection::default());
        assert_eq!(ids(&list), vec!["a"]);
        assert_eq!(service.current(), Some(list));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_select_recomputes() {
        let store = seeded_store();
        play(&store, "a", now() - Duration::hours(1));
        play(&store, "b", Utc.with_ymd_and_hms(2026, 9, 10, 8, 0, 0).unwrap());

        let service = StatsService::spawn(store, Preferences::default(), GroupBy::Song, fixed_clock());
        let mut rx = service.subscribe();
        service.select(StatMode::Monthly, 1);
        let target = Selection::new(StatMode::Monthly, 1);
        let list = wait_for(&mut rx, |l| l.as_ref().is_some_and(|l| l.selection == target)).await;
        assert_eq!(ids(&list), vec!["b"]);
        assert_eq!(service.selection(), target);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_last_selection_wins() {
        let store = seeded_store();
        play(&store, "a", now() - Duration::hours(1));

        let service = StatsService::spawn(store, Preferences::default(), GroupBy::Song, fixed_clock());
        let mut rx = service.subscribe();
        service.select(StatMode::Weekly, 0);
        service.select(StatMode::Monthly, 0);
        service.select(StatMode::Yearly, 0);

        let target = Selection::new(StatMode::Yearly, 0);
        wait_for(&mut rx, |l| l.as_ref().is_some_and(|l| l.selection == target)).await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(service.current().map(|l| l.selection), Some(target));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_store_write_recomputes() {
        let store = seeded_store();
        let service = StatsService::spawn(store.clone(), Preferences::default(), GroupBy::Song, fixed_clock());
        let mut rx = service.subscribe();
        let list = wait_for(&mut rx, |l| l.is_some()).await;
        assert!(list.entries.is_empty());

        play(&store, "b", now() - Duration::minutes(10));
        let list = wait_for(&mut rx, |l| l.as_ref().is_some_and(|l| !l.entries.is_empty())).await;
        assert_eq!(ids(&list), vec!["b"]);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_preference_change_recomputes() {
        let store = seeded_store();
        play(&store, "v", now() - Duration::hours(3));
        play(&store, "v", now() - Duration::hours(2));
        play(&store, "a", now() - Duration::hours(1));

        let prefs = Preferences::new(StatsPreferences::default());
        let service = StatsService::spawn(store, prefs.clone(), GroupBy::Song, fixed_clock());
        let mut rx = service.subscribe();
        let list = wait_for(&mut rx, |l| l.is_some()).await;
        assert_eq!(ids(&list), vec!["v", "a"]);

        prefs.set_hide_video_songs(true);
        let list = wait_for(&mut rx, |l| l.as_ref().is_some_and(|l| l.entries.len() == 1)).await;
        assert_eq!(ids(&list), vec!["a"]);
        service.shutdown().await;
    }

    struct RenamingSource;

    impl MetadataSource for RenamingSource {
        fn fetch_artist(&self, id: &str) -> Result<ArtistMetadata, RemoteError> {
            Ok(ArtistMetadata {
                name: format!("{id} (refreshed)"),
                thumbnail_url: Some(format!("https://img/{id}.jpg")),
            })
        }

        fn fetch_album(&self, id: &str) -> Result<AlbumMetadata, RemoteError> {
            Err(RemoteError::NotFound(id.to_string()))
        }
    }

    #[tokio::test]
    async fn test_reconciliation_follows_artist_ranking() {
        let store = seeded_store();
        play(&store, "a", now() - Duration::hours(1));

        let service = StatsService::spawn(store.clone(), Preferences::default(), GroupBy::Artist, fixed_clock());
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            Arc::new(RenamingSource),
            ReconcilePolicy::default(),
        ));
        let handle = spawn_reconciliation(service.subscribe(), reconciler, fixed_clock());

        let mut rx = service.subscribe();
        let list = wait_for(&mut rx, |l| {
            l.as_ref()
                .is_some_and(|l| l.entries.first().is_some_and(|e| e.name == "UCone (refreshed)"))
        })
        .await;
        assert_eq!(list.entries.len(), 1);
        let artist = store.read(|db| db.get_artist("UCone")).unwrap().unwrap();
        assert_eq!(artist.thumbnail_url.as_deref(), Some("https://img/UCone.jpg"));
        // Never ranked, never fetched
        let other = store.read(|db| db.get_artist("UCtwo")).unwrap().unwrap();
        assert_eq!(other.name, "UCtwo");

        service.shutdown().await;
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("reconciliation did not stop")
            .unwrap();
    }
}
