use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use listenstats::config::{AppConfig, Preferences};
use listenstats::db::models::{CatalogImport, GroupBy, NewPlayEvent, RankedEntity};
use listenstats::db::Database;
use listenstats::period::{self, Selection, StatMode};
use listenstats::reconcile::{ReconcileReport, Reconciler};
use listenstats::remote::HttpMetadataSource;
use listenstats::service::{self, StatsService};
use listenstats::stats::{self, AggregateOptions};
use listenstats::store::SharedStore;

#[derive(Parser)]
#[command(name = "listenstats", version, about = "Listening history statistics")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeName {
    Continuous,
    Weekly,
    Monthly,
    Yearly,
}

impl ModeName {
    fn mode(self) -> StatMode {
        match self {
            Self::Continuous => StatMode::Continuous,
            Self::Weekly => StatMode::Weekly,
            Self::Monthly => StatMode::Monthly,
            Self::Yearly => StatMode::Yearly,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum GroupName {
    Song,
    Artist,
    Album,
}

impl GroupName {
    fn group_by(self) -> GroupBy {
        match self {
            Self::Song => GroupBy::Song,
            Self::Artist => GroupBy::Artist,
            Self::Album => GroupBy::Album,
        }
    }
}

/// Entities that can be refreshed from the remote source.
#[derive(Clone, Copy, ValueEnum)]
enum EntityName {
    Artist,
    Album,
}

impl EntityName {
    fn group_by(self) -> GroupBy {
        match self {
            Self::Artist => GroupBy::Artist,
            Self::Album => GroupBy::Album,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Import songs, albums and play events from a JSON file
    Import {
        /// JSON document with `albums`, `songs` and `events` arrays
        file: PathBuf,
    },

    /// Record a single play of a known song
    Record {
        song_id: String,

        /// Milliseconds actually listened
        #[arg(long)]
        play_ms: i64,

        /// Play time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Show the most played songs, artists or albums
    Top {
        #[arg(long, value_enum, default_value = "continuous")]
        mode: ModeName,

        /// Chip index within the mode (0 = most recent)
        #[arg(long, default_value = "0")]
        index: usize,

        #[arg(long, value_enum, default_value = "song")]
        by: GroupName,

        /// Number of results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// List the selectable periods for a mode
    Periods {
        #[arg(long, value_enum, default_value = "continuous")]
        mode: ModeName,
    },

    /// Totals for one period
    Summary {
        #[arg(long, value_enum, default_value = "continuous")]
        mode: ModeName,

        #[arg(long, default_value = "0")]
        index: usize,
    },

    /// Refresh stale artists or albums in a ranking from the remote source
    Reconcile {
        #[arg(long, value_enum, default_value = "artist")]
        by: EntityName,

        #[arg(long, value_enum, default_value = "continuous")]
        mode: ModeName,

        #[arg(long, default_value = "0")]
        index: usize,
    },

    /// Delete all play events (the song/artist/album cache is kept)
    ClearHistory,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli.db_path
        .or(config.db_path.clone())
        .unwrap_or_else(listenstats::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Database::open(&db_path)
        .context("Failed to open database")?;
    let now = Utc::now();

    match cli.command {
        Commands::Import { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let import: CatalogImport = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            let result = db.import_catalog(&import, now)
                .context("Import failed")?;
            println!(
                "Import complete: {} albums, {} songs, {} events",
                result.albums, result.songs, result.events
            );
        }

        Commands::Record { song_id, play_ms, at } => {
            if db.get_song(&song_id).context("Query failed")?.is_none() {
                anyhow::bail!("Unknown song '{song_id}'. Import it first.");
            }
            let event = NewPlayEvent {
                song_id,
                timestamp: at.unwrap_or(now),
                play_time_ms: play_ms.max(0),
            };
            let id = db.insert_event(&event).context("Failed to record play")?;
            println!("Recorded play #{id} of {} at {}", event.song_id, event.timestamp.to_rfc3339());
        }

        Commands::Top { mode, index, by, limit } => {
            let group_by = by.group_by();
            let selection = Selection::new(mode.mode(), index);
            let Some(range) = stats::resolve_selection(&db, selection, now)
                .context("Query failed")?
            else {
                println!("No such period. Run `listenstats periods --mode ...` to list them.");
                return Ok(());
            };
            let options = AggregateOptions::from_preferences(&config.preferences).with_limit(limit);
            let results = stats::aggregate(&db, &range, group_by, &options)
                .context("Query failed")?;

            if results.is_empty() {
                println!("No plays in this period.");
                return Ok(());
            }

            println!(
                "Top {} {}s ({}):",
                results.len(),
                group_by.label(),
                period_label(&db, selection, now)?
            );
            println!();
            print_ranking(&results);
        }

        Commands::Periods { mode } => {
            let first = db.first_event_timestamp().context("Query failed")?;
            let chips = period::chip_labels(mode.mode(), now, first);
            if chips.is_empty() {
                println!("No listening history yet.");
                return Ok(());
            }
            for (index, label) in chips {
                println!("  {:>3}  {}", index, label);
            }
        }

        Commands::Summary { mode, index } => {
            let selection = Selection::new(mode.mode(), index);
            let Some(range) = stats::resolve_selection(&db, selection, now)
                .context("Query failed")?
            else {
                println!("No such period.");
                return Ok(());
            };
            let summary = stats::summary(&db, &range).context("Query failed")?;
            println!("Listening Summary: {}", period_label(&db, selection, now)?);
            println!("==================");
            println!("Plays:            {}", summary.play_count);
            println!("Time listened:    {}", stats::format_listened(summary.total_play_time_ms));
            println!("Songs:            {}", summary.unique_songs);
            println!("Artists:          {}", summary.unique_artists);
            println!("Albums:           {}", summary.unique_albums);
        }

        Commands::Reconcile { by, mode, index } => {
            let Some(base_url) = config.remote.base_url.as_deref() else {
                anyhow::bail!("No remote source configured. Set [remote] base_url in the config file.");
            };
            let source = HttpMetadataSource::new(
                base_url,
                Duration::from_secs(config.remote.timeout_secs),
                &config.remote.user_agent,
            );
            let store = SharedStore::new(db);
            let reconciler = Reconciler::new(store.clone(), Arc::new(source), config.reconcile.policy());
            let preferences = Preferences::new(config.preferences.clone());

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            let report = runtime.block_on(async {
                let view = StatsService::spawn(store, preferences, by.group_by(), service::system_clock());
                view.select(mode.mode(), index);
                let target = Selection::new(mode.mode(), index);
                let mut rx = view.subscribe();
                let ranking = rx
                    .wait_for(|list| list.as_ref().is_some_and(|l| l.selection == target))
                    .await
                    .ok()
                    .and_then(|list| (*list).clone())
                    .map(|list| list.entries)
                    .unwrap_or_default();
                view.shutdown().await;
                reconcile_with_progress(&reconciler, &ranking).await
            });

            println!(
                "Reconcile complete: {} checked, {} refreshed, {} removed, {} failed, {} up to date",
                report.checked, report.refreshed, report.deleted, report.failed, report.skipped
            );
        }

        Commands::ClearHistory => {
            let deleted = db.delete_all_events().context("Failed to clear history")?;
            println!("Deleted {deleted} play events");
        }
    }

    Ok(())
}

/// Reconcile a ranking one entity at a time, with a progress bar.
async fn reconcile_with_progress(reconciler: &Reconciler, ranking: &[RankedEntity]) -> ReconcileReport {
    if ranking.is_empty() {
        return ReconcileReport::default();
    }

    let pb = ProgressBar::new(ranking.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta} remaining) {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );

    let report = reconciler
        .run_pass_with(ranking, Utc::now(), |entity, outcome| {
            pb.set_message(entity.name.clone());
            log::debug!("{} {}: {outcome:?}", entity.group.label(), entity.id);
            pb.inc(1);
        })
        .await;
    pb.finish_and_clear();
    report
}

/// Chip label for a selection, e.g. "1 month" or "Oct".
fn period_label(db: &Database, selection: Selection, now: DateTime<Utc>) -> Result<String> {
    let first = db.first_event_timestamp().context("Query failed")?;
    Ok(period::chip_labels(selection.mode, now, first)
        .into_iter()
        .find(|(index, _)| *index == selection.index)
        .map(|(_, label)| label)
        .unwrap_or_default())
}

/// Print a ranking table.
fn print_ranking(entries: &[RankedEntity]) {
    println!("{:>4}  {:<40} {:>6} {:>10}", "#", "Name", "Plays", "Listened");
    println!("{}", "-".repeat(64));

    for (rank, e) in entries.iter().enumerate() {
        // Truncate long names
        let name: String = if e.name.chars().count() > 40 {
            format!("{}...", e.name.chars().take(37).collect::<String>())
        } else {
            e.name.clone()
        };
        println!(
            "{:>4}  {:<40} {:>6} {:>10}",
            rank + 1,
            name,
            e.play_count,
            stats::format_listened(e.time_listened_ms)
        );
    }
}
