//! Ranked "most played" views over a resolved time range.

use chrono::{DateTime, Utc};

use crate::config::StatsPreferences;
use crate::db::models::{is_youtube_artist_id, GroupBy, RangeSummary, RankedEntity};
use crate::db::{Database, Result};
use crate::period::{self, Selection, TimeRange};

/// Product filters applied on top of the raw ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Keep at most this many entries (after filtering).
    pub limit: Option<usize>,
    /// Drop artists without a remote channel (recommendation seeding).
    pub youtube_artists_only: bool,
    /// Drop video songs from song rankings.
    pub hide_video_songs: bool,
}

impl AggregateOptions {
    pub fn from_preferences(prefs: &StatsPreferences) -> Self {
        Self {
            limit: None,
            youtube_artists_only: prefs.youtube_artists_only,
            hide_video_songs: prefs.hide_video_songs,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn filters(&self, group_by: GroupBy) -> bool {
        match group_by {
            GroupBy::Song => self.hide_video_songs,
            GroupBy::Artist => self.youtube_artists_only,
            GroupBy::Album => false,
        }
    }
}

/// Rank songs, artists or albums by play count within `range`.
///
/// Empty ranges and ranges without plays yield an empty list.
pub fn aggregate(
    db: &Database,
    range: &TimeRange,
    group_by: GroupBy,
    options: &AggregateOptions,
) -> Result<Vec<RankedEntity>> {
    if range.is_empty() {
        return Ok(Vec::new());
    }

    if !options.filters(group_by) {
        return db.most_played(range, group_by, options.limit);
    }

    let mut ranked = db.most_played(range, group_by, None)?;
    ranked.retain(|entity| match group_by {
        GroupBy::Song => !(options.hide_video_songs && entity.is_video),
        GroupBy::Artist => !options.youtube_artists_only || is_youtube_artist_id(&entity.id),
        GroupBy::Album => true,
    });
    if let Some(limit) = options.limit {
        ranked.truncate(limit);
    }
    Ok(ranked)
}

/// Resolve a selection against the store's first play.
pub fn resolve_selection(
    db: &Database,
    selection: Selection,
    now: DateTime<Utc>,
) -> Result<Option<TimeRange>> {
    let first_event = match selection.mode.calendar() {
        Some(_) => db.first_event_timestamp()?,
        None => None,
    };
    Ok(period::resolve(selection.mode, selection.index, now, first_event))
}

/// Resolve and aggregate in one step; an unresolvable selection is empty.
pub fn aggregate_selection(
    db: &Database,
    selection: Selection,
    now: DateTime<Utc>,
    group_by: GroupBy,
    options: &AggregateOptions,
) -> Result<Vec<RankedEntity>> {
    match resolve_selection(db, selection, now)? {
        Some(range) => aggregate(db, &range, group_by, options),
        None => {
            log::debug!("No range for {selection:?}, nothing to rank");
            Ok(Vec::new())
        }
    }
}

pub fn summary(db: &Database, range: &TimeRange) -> Result<RangeSummary> {
    if range.is_empty() {
        return Ok(RangeSummary::default());
    }
    db.range_summary(range)
}

/// Human-readable listening time: `"2h 05m"`, `"4m 10s"`, `"12s"`.
pub fn format_listened(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ArtistRef, NewPlayEvent, NewSong};
    use crate::period::{StatMode, StatPeriod};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
    }

    fn add_song(db: &Database, id: &str, artist: &str, is_video: bool) {
        db.upsert_song(
            &NewSong {
                id: id.into(),
                title: id.to_uppercase(),
                album_id: None,
                duration_secs: Some(180),
                is_video,
                explicit: false,
                artists: vec![ArtistRef {
                    id: artist.into(),
                    name: artist.into(),
                    thumbnail_url: None,
                }],
            },
            now(),
        )
        .unwrap();
    }

    fn play(db: &Database, song_id: &str, at: DateTime<Utc>) {
        db.insert_event(&NewPlayEvent {
            song_id: song_id.into(),
            timestamp: at,
            play_time_ms: 60_000,
        })
        .unwrap();
    }

    fn library() -> Database {
        let db = Database::open_in_memory().unwrap();
        add_song(&db, "a", "UCone", false);
        add_song(&db, "b", "LAlocal", false);
        add_song(&db, "v", "UCone", true);
        db
    }

    #[test]
    fn test_no_events_is_empty() {
        let db = library();
        let range = StatPeriod::All.range(now());
        let ranked = aggregate(&db, &range, GroupBy::Song, &AggregateOptions::default()).unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_empty_range_is_empty() {
        let db = library();
        play(&db, "a", now() - Duration::hours(1));
        let range = TimeRange::new(now(), now());
        let ranked = aggregate(&db, &range, GroupBy::Song, &AggregateOptions::default()).unwrap();
        assert!(ranked.is_empty());
        assert_eq!(summary(&db, &range).unwrap(), RangeSummary::default());
    }

    #[test]
    fn test_recent_events_same_for_week_and_month() {
        let db = library();
        for days in 0..3 {
            play(&db, "a", now() - Duration::days(days) - Duration::minutes(5));
        }
        play(&db, "b", now() - Duration::days(2));

        let opts = AggregateOptions::default();
        let week = aggregate(&db, &StatPeriod::Week1.range(now()), GroupBy::Song, &opts).unwrap();
        let month = aggregate(&db, &StatPeriod::Month1.range(now()), GroupBy::Song, &opts).unwrap();
        assert_eq!(week, month);
        assert_eq!(week.iter().map(|r| r.play_count).sum::<i64>(), 4);
        assert_eq!(week[0].id, "a");
        assert_eq!(week[0].play_count, 3);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let db = library();
        play(&db, "a", now() - Duration::hours(3));
        play(&db, "b", now() - Duration::hours(2));
        play(&db, "v", now() - Duration::hours(1));
        let range = StatPeriod::Month3.range(now());
        let opts = AggregateOptions::default();
        let first = aggregate(&db, &range, GroupBy::Song, &opts).unwrap();
        let second = aggregate(&db, &range, GroupBy::Song, &opts).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_filters_apply_before_limit() {
        let db = library();
        play(&db, "v", now() - Duration::hours(5));
        play(&db, "v", now() - Duration::hours(4));
        play(&db, "a", now() - Duration::hours(3));
        play(&db, "b", now() - Duration::hours(2));
        let range = StatPeriod::Week1.range(now());

        let opts = AggregateOptions {
            hide_video_songs: true,
            ..Default::default()
        }
        .with_limit(1);
        let songs = aggregate(&db, &range, GroupBy::Song, &opts).unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].id, "a");

        let opts = AggregateOptions {
            youtube_artists_only: true,
            ..Default::default()
        };
        let artists = aggregate(&db, &range, GroupBy::Artist, &opts).unwrap();
        let ids: Vec<_> = artists.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["UCone"]);
    }

    #[test]
    fn test_aggregate_selection_calendar_without_history() {
        let db = library();
        let ranked = aggregate_selection(
            &db,
            Selection::new(StatMode::Monthly, 0),
            now(),
            GroupBy::Song,
            &AggregateOptions::default(),
        )
        .unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_aggregate_selection_previous_month() {
        let db = library();
        play(&db, "a", Utc.with_ymd_and_hms(2026, 9, 3, 10, 0, 0).unwrap());
        play(&db, "b", Utc.with_ymd_and_hms(2026, 10, 2, 10, 0, 0).unwrap());
        let ranked = aggregate_selection(
            &db,
            Selection::new(StatMode::Monthly, 1),
            now(),
            GroupBy::Song,
            &AggregateOptions::default(),
        )
        .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "a");
    }

    #[test]
    fn test_format_listened() {
        assert_eq!(format_listened(12_000), "12s");
        assert_eq!(format_listened(250_000), "4m 10s");
        assert_eq!(format_listened(7_500_000), "2h 05m");
        assert_eq!(format_listened(-5), "0s");
    }
}
