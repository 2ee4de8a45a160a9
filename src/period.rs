//! Period resolution: turns a stats selection (mode + chip index) into a
//! concrete half-open time range.
//!
//! Continuous periods are rolling windows ending now. Calendar periods are
//! UTC-aligned weeks (Monday start), months and years, indexed backwards from
//! the current (partial) period down to the one holding the first recorded
//! play.

use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, Utc};

/// Half-open `[from, to)` interval of instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.from <= t && t < self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    pub fn from_millis(&self) -> i64 {
        self.from.timestamp_millis()
    }

    pub fn to_millis(&self) -> i64 {
        self.to.timestamp_millis()
    }
}

/// Rolling lookback windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatPeriod {
    Week1,
    Month1,
    Month3,
    Month6,
    Year1,
    All,
}

impl StatPeriod {
    /// Chip order in the continuous mode.
    pub const ALL_PERIODS: [StatPeriod; 6] = [
        Self::Week1,
        Self::Month1,
        Self::Month3,
        Self::Month6,
        Self::Year1,
        Self::All,
    ];

    /// Start of the window ending at `now`.
    pub fn start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Week1 => now - Duration::weeks(1),
            Self::Month1 => months_before(now, 1),
            Self::Month3 => months_before(now, 3),
            Self::Month6 => months_before(now, 6),
            Self::Year1 => months_before(now, 12),
            Self::All => DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn range(self, now: DateTime<Utc>) -> TimeRange {
        TimeRange::new(self.start(now), now)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Week1 => "1 week",
            Self::Month1 => "1 month",
            Self::Month3 => "3 months",
            Self::Month6 => "6 months",
            Self::Year1 => "1 year",
            Self::All => "All time",
        }
    }
}

fn months_before(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Calendar-aligned bucket sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarMode {
    Weekly,
    Monthly,
    Yearly,
}

impl CalendarMode {
    /// Start of the period containing `t`.
    pub fn period_start(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let date = t.date_naive();
        let start = match self {
            Self::Weekly => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
            Self::Monthly => date - Duration::days(i64::from(date.day0())),
            Self::Yearly => date - Duration::days(i64::from(date.ordinal0())),
        };
        start.and_time(NaiveTime::MIN).and_utc()
    }

    /// The period start `periods` steps before `start`.
    fn step_back(self, start: DateTime<Utc>, periods: u32) -> Option<DateTime<Utc>> {
        match self {
            Self::Weekly => start.checked_sub_signed(Duration::weeks(i64::from(periods))),
            Self::Monthly => start.checked_sub_months(Months::new(periods)),
            Self::Yearly => start.checked_sub_months(Months::new(periods.checked_mul(12)?)),
        }
    }

    /// Whole periods between two period starts (`later` >= `earlier`).
    fn periods_between(self, earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
        match self {
            Self::Weekly => (later - earlier).num_weeks(),
            Self::Monthly => month_ordinal(later) - month_ordinal(earlier),
            Self::Yearly => i64::from(later.year()) - i64::from(earlier.year()),
        }
    }
}

fn month_ordinal(t: DateTime<Utc>) -> i64 {
    i64::from(t.year()) * 12 + i64::from(t.month0())
}

/// The stats mode chip row: rolling windows or one of the calendar modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatMode {
    #[default]
    Continuous,
    Weekly,
    Monthly,
    Yearly,
}

impl StatMode {
    pub fn calendar(self) -> Option<CalendarMode> {
        match self {
            Self::Continuous => None,
            Self::Weekly => Some(CalendarMode::Weekly),
            Self::Monthly => Some(CalendarMode::Monthly),
            Self::Yearly => Some(CalendarMode::Yearly),
        }
    }
}

/// A mode plus the selected chip within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Selection {
    pub mode: StatMode,
    pub index: usize,
}

impl Selection {
    pub fn new(mode: StatMode, index: usize) -> Self {
        Self { mode, index }
    }
}

/// Resolve a selection to a time range.
///
/// Returns `None` when `index` is outside the chips available for the mode,
/// which includes every calendar index when there is no listening history.
pub fn resolve(
    mode: StatMode,
    index: usize,
    now: DateTime<Utc>,
    first_event: Option<DateTime<Utc>>,
) -> Option<TimeRange> {
    match mode.calendar() {
        None => StatPeriod::ALL_PERIODS
            .get(index)
            .map(|period| period.range(now)),
        Some(calendar) => CalendarSequence::new(calendar, now, first_event)
            .get(index)
            .map(|bucket| bucket.range),
    }
}

/// One calendar bucket: index 0 is the current, partial period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarBucket {
    pub mode: CalendarMode,
    pub index: usize,
    pub range: TimeRange,
}

impl CalendarBucket {
    /// Chip label, relative to the current date.
    pub fn label(&self, now: DateTime<Utc>) -> String {
        let start = self.range.from.date_naive();
        match self.mode {
            CalendarMode::Weekly => {
                let end = (start + Duration::days(6)).min(now.date_naive());
                let start_fmt = start.format("%d %b");
                let end_fmt = end.format("%d %b");
                if start.year() != now.year() {
                    format!("{start_fmt}, {} - {end_fmt}, {}", start.year(), end.year())
                } else if start.month() != end.month() {
                    format!("{start_fmt} - {end_fmt}")
                } else {
                    format!("{} - {end_fmt}", start.day())
                }
            }
            CalendarMode::Monthly => {
                if start.year() != now.year() {
                    start.format("%b %Y").to_string()
                } else {
                    start.format("%b").to_string()
                }
            }
            CalendarMode::Yearly => start.year().to_string(),
        }
    }
}

/// Backward sequence of calendar buckets from now down to the first play.
///
/// Cheap to build and restartable: every call to [`CalendarSequence::iter`]
/// walks the sequence again from the current period.
#[derive(Debug, Clone, Copy)]
pub struct CalendarSequence {
    mode: CalendarMode,
    now: DateTime<Utc>,
    first_event: Option<DateTime<Utc>>,
}

impl CalendarSequence {
    pub fn new(mode: CalendarMode, now: DateTime<Utc>, first_event: Option<DateTime<Utc>>) -> Self {
        Self {
            mode,
            now,
            first_event,
        }
    }

    pub fn len(&self) -> usize {
        let Some(first) = self.first_event else {
            return 0;
        };
        let current = self.mode.period_start(self.now);
        let earliest = self.mode.period_start(first);
        let between = if earliest < current {
            self.mode.periods_between(earliest, current)
        } else {
            0
        };
        usize::try_from(between).map_or(usize::MAX, |n| n.saturating_add(1))
    }

    pub fn is_empty(&self) -> bool {
        self.first_event.is_none()
    }

    pub fn get(&self, index: usize) -> Option<CalendarBucket> {
        if index >= self.len() {
            return None;
        }
        let current = self.mode.period_start(self.now);
        let range = if index == 0 {
            TimeRange::new(current, self.now)
        } else {
            let steps = u32::try_from(index).ok()?;
            TimeRange::new(
                self.mode.step_back(current, steps)?,
                self.mode.step_back(current, steps - 1)?,
            )
        };
        Some(CalendarBucket {
            mode: self.mode,
            index,
            range,
        })
    }

    pub fn iter(&self) -> CalendarBuckets<'_> {
        CalendarBuckets {
            sequence: self,
            next: 0,
            len: self.len(),
        }
    }

    /// `(index, label)` pairs for the chip row.
    pub fn labels(&self) -> Vec<(usize, String)> {
        self.iter()
            .map(|bucket| (bucket.index, bucket.label(self.now)))
            .collect()
    }
}

impl<'a> IntoIterator for &'a CalendarSequence {
    type Item = CalendarBucket;
    type IntoIter = CalendarBuckets<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct CalendarBuckets<'a> {
    sequence: &'a CalendarSequence,
    next: usize,
    len: usize,
}

impl Iterator for CalendarBuckets<'_> {
    type Item = CalendarBucket;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let bucket = self.sequence.get(self.next)?;
        self.next += 1;
        Some(bucket)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

/// `(index, label)` chips for any mode.
pub fn chip_labels(
    mode: StatMode,
    now: DateTime<Utc>,
    first_event: Option<DateTime<Utc>>,
) -> Vec<(usize, String)> {
    match mode.calendar() {
        None => StatPeriod::ALL_PERIODS
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.label().to_string()))
            .collect(),
        Some(calendar) => CalendarSequence::new(calendar, now, first_event).labels(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_continuous_ranges_end_now() {
        let now = at(2026, 10, 15, 12);
        for period in StatPeriod::ALL_PERIODS {
            let range = period.range(now);
            assert_eq!(range.to, now);
        }
        assert_eq!(StatPeriod::Week1.start(now), at(2026, 10, 8, 12));
        assert_eq!(StatPeriod::Month1.start(now), at(2026, 9, 15, 12));
        assert_eq!(StatPeriod::Month3.start(now), at(2026, 7, 15, 12));
        assert_eq!(StatPeriod::Month6.start(now), at(2026, 4, 15, 12));
        assert_eq!(StatPeriod::Year1.start(now), at(2025, 10, 15, 12));
        assert_eq!(StatPeriod::All.start(now), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_month_subtraction_clamps_day() {
        let now = at(2026, 3, 31, 0);
        assert_eq!(StatPeriod::Month1.start(now), at(2026, 2, 28, 0));
    }

    #[test]
    fn test_resolve_continuous_index() {
        let now = at(2026, 10, 15, 12);
        let range = resolve(StatMode::Continuous, 0, now, None).unwrap();
        assert_eq!(range, StatPeriod::Week1.range(now));
        let all = resolve(StatMode::Continuous, 5, now, None).unwrap();
        assert_eq!(all.from, DateTime::<Utc>::UNIX_EPOCH);
        assert!(resolve(StatMode::Continuous, 6, now, None).is_none());
    }

    #[test]
    fn test_calendar_empty_without_history() {
        let now = at(2026, 10, 15, 12);
        for mode in [CalendarMode::Weekly, CalendarMode::Monthly, CalendarMode::Yearly] {
            let seq = CalendarSequence::new(mode, now, None);
            assert!(seq.is_empty());
            assert_eq!(seq.len(), 0);
            assert_eq!(seq.iter().count(), 0);
        }
        assert!(resolve(StatMode::Weekly, 0, now, None).is_none());
    }

    #[test]
    fn test_weekly_alignment_and_length() {
        // 2026-10-15 is a Thursday; first play on Wednesday 2026-09-30.
        let now = at(2026, 10, 15, 12);
        let seq = CalendarSequence::new(CalendarMode::Weekly, now, Some(at(2026, 9, 30, 8)));
        assert_eq!(seq.len(), 3);

        let buckets: Vec<_> = seq.iter().collect();
        assert_eq!(buckets[0].range, TimeRange::new(at(2026, 10, 12, 0), now));
        assert_eq!(buckets[1].range, TimeRange::new(at(2026, 10, 5, 0), at(2026, 10, 12, 0)));
        assert_eq!(buckets[2].range, TimeRange::new(at(2026, 9, 28, 0), at(2026, 10, 5, 0)));
        assert!(buckets[2].range.contains(at(2026, 9, 30, 8)));
        assert!(seq.get(3).is_none());
    }

    #[test]
    fn test_calendar_sequences_are_contiguous() {
        let now = at(2026, 10, 15, 12);
        let first = Some(at(2023, 2, 17, 9));
        for mode in [CalendarMode::Weekly, CalendarMode::Monthly, CalendarMode::Yearly] {
            let seq = CalendarSequence::new(mode, now, first);
            let buckets: Vec<_> = seq.iter().collect();
            assert_eq!(buckets.len(), seq.len());
            assert_eq!(buckets[0].range.to, now);
            for pair in buckets.windows(2) {
                assert_eq!(pair[1].range.to, pair[0].range.from, "{mode:?} gap");
                assert!(pair[1].range.from < pair[1].range.to);
            }
            let last = buckets.last().unwrap();
            assert!(last.range.contains(first.unwrap()), "{mode:?} misses first play");
        }
    }

    #[test]
    fn test_sequence_is_restartable() {
        let now = at(2026, 10, 15, 12);
        let seq = CalendarSequence::new(CalendarMode::Monthly, now, Some(at(2025, 11, 20, 0)));
        let first_pass: Vec<_> = seq.iter().collect();
        let second_pass: Vec<_> = (&seq).into_iter().collect();
        assert_eq!(first_pass, second_pass);
        assert_eq!(first_pass.len(), 12);
    }

    #[test]
    fn test_first_event_in_current_period() {
        let now = at(2026, 10, 15, 12);
        let seq = CalendarSequence::new(CalendarMode::Yearly, now, Some(at(2026, 10, 15, 11)));
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.get(0).unwrap().range, TimeRange::new(at(2026, 1, 1, 0), now));
    }

    #[test]
    fn test_weekly_labels() {
        let now = at(2026, 10, 15, 12);
        let seq = CalendarSequence::new(CalendarMode::Weekly, now, Some(at(2026, 9, 28, 0)));
        let labels = seq.labels();
        assert_eq!(labels[0], (0, "12 - 15 Oct".to_string()));
        assert_eq!(labels[1], (1, "5 - 11 Oct".to_string()));
        assert_eq!(labels[2], (2, "28 Sep - 04 Oct".to_string()));

        let new_year = at(2026, 1, 7, 12);
        let seq = CalendarSequence::new(CalendarMode::Weekly, new_year, Some(at(2025, 12, 30, 0)));
        assert_eq!(seq.labels()[1].1, "29 Dec, 2025 - 04 Jan, 2026");
    }

    #[test]
    fn test_monthly_and_yearly_labels() {
        let now = at(2026, 10, 15, 12);
        let months = CalendarSequence::new(CalendarMode::Monthly, now, Some(at(2025, 11, 20, 0)));
        let labels = months.labels();
        assert_eq!(labels[0].1, "Oct");
        assert_eq!(labels[11].1, "Nov 2025");

        let years = CalendarSequence::new(CalendarMode::Yearly, now, Some(at(2024, 3, 1, 0)));
        let labels: Vec<_> = years.labels().into_iter().map(|(_, l)| l).collect();
        assert_eq!(labels, vec!["2026", "2025", "2024"]);
    }

    #[test]
    fn test_continuous_chip_labels() {
        let now = at(2026, 10, 15, 12);
        let chips = chip_labels(StatMode::Continuous, now, None);
        assert_eq!(chips.len(), 6);
        assert_eq!(chips[5], (5, "All time".to_string()));
    }
}
