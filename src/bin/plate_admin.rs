//! plate_admin - administrative shell for the observation datastore
//!
//! Synchronous, one-shot operations outside the detection loop: aggregate
//! statistics, plate history, hourly traffic, age-based cleanup, delete by
//! plate and full purge. Deletes also remove the crop artifacts the deleted
//! rows point at. The datastore must already exist.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Days, Local, NaiveDate, TimeZone};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use plate_watch::pipeline::open_admin_gateway;
use plate_watch::{normalize, PlatewatchConfig, TimeRange};

#[derive(Parser, Debug)]
#[command(name = "plate_admin", about = "Plate Watch datastore administration")]
struct Args {
    /// JSON or TOML config file
    #[arg(long, env = "PLATEWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Datastore path (overrides config)
    #[arg(long)]
    db: Option<String>,
    /// Artifact root (overrides config)
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print aggregate counts
    Stats,
    /// List observations whose plate contains the given text, newest first
    History {
        /// Plate text or fragment; omitted lists every plate
        #[arg(long)]
        plate: Option<String>,
        /// First day included (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day included (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Observations per hour of day and the peak hour
    Traffic {
        /// First day included (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// Last day included (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
    },
    /// Delete observations older than N days
    Cleanup {
        #[arg(long)]
        days: u32,
    },
    /// Delete every observation of one plate
    Delete {
        #[arg(long)]
        plate: String,
    },
    /// Delete all observations
    Purge {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

fn local_midnight(date: NaiveDate) -> Result<DateTime<Local>> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid date {}", date))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| anyhow!("no local midnight on {}", date))
}

/// Inclusive day bounds as a half-open range ending at the next midnight.
fn day_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<TimeRange> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(anyhow!("--from {} is after --to {}", from, to));
        }
    }
    let start = from.map(local_midnight).transpose()?;
    let end = to
        .map(|day| {
            day.checked_add_days(Days::new(1))
                .ok_or_else(|| anyhow!("date {} out of range", day))
                .and_then(local_midnight)
        })
        .transpose()?;
    Ok(TimeRange::new(start, end))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = PlatewatchConfig::load_from(args.config.as_deref())?;
    if let Some(db) = args.db {
        cfg.db_path = db;
    }
    if let Some(dir) = args.output {
        cfg.output_dir = dir;
    }
    let gateway = open_admin_gateway(&cfg)?;

    match args.command {
        Command::Stats => {
            let stats = gateway.stats()?;
            println!("Datastore: {}", cfg.db_path);
            println!("  total observations: {}", stats.total);
            println!("  valid: {}  invalid: {}", stats.valid, stats.invalid);
            println!("  distinct plates: {}", stats.distinct_plates);
            if let (Some(first), Some(last)) = (stats.first_seen, stats.last_seen) {
                println!(
                    "  span: {} .. {}",
                    first.format("%Y-%m-%d %H:%M:%S"),
                    last.format("%Y-%m-%d %H:%M:%S")
                );
            }
            for (source, count) in &stats.per_source {
                println!("  source {}: {}", source, count);
            }
        }
        Command::History {
            plate,
            from,
            to,
            limit,
        } => {
            let pattern = plate.as_deref().map(normalize).unwrap_or_default();
            let rows = gateway.find_observations(&pattern, day_range(from, to)?, limit)?;
            if rows.is_empty() {
                println!("No observations found");
            }
            for row in &rows {
                let r = &row.record;
                println!(
                    "{:>6}  {}  {:<10} {:<12} {:<7} det {:.2} rec {:.2}  {}",
                    row.id,
                    r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    r.plate_text,
                    r.source_id,
                    if r.is_valid { "valid" } else { "invalid" },
                    r.detection_confidence,
                    r.recognition_confidence,
                    r.artifact_path
                );
            }
        }
        Command::Traffic { from, to } => {
            let counts = gateway.hourly_counts(day_range(Some(from), Some(to))?)?;
            println!("Traffic {} .. {}: {} observation(s)", from, to, counts.total());
            for (hour, count) in counts.counts.iter().enumerate() {
                if *count > 0 {
                    println!("  {:02}:00  {}", hour, count);
                }
            }
            match counts.peak_hour() {
                Some((hour, count)) => {
                    println!("Peak hour: {:02}:00 ({} observation(s))", hour, count)
                }
                None => println!("No observations in range"),
            }
        }
        Command::Cleanup { days } => {
            if days == 0 {
                return Err(anyhow!("--days must be greater than zero"));
            }
            let report = gateway.cleanup_older_than(days)?;
            println!(
                "Deleted {} observation(s) older than {} day(s), removed {} artifact(s)",
                report.rows, days, report.artifacts_removed
            );
        }
        Command::Delete { plate } => {
            let canonical = normalize(&plate);
            if canonical.is_empty() {
                return Err(anyhow!("plate {:?} is empty after normalization", plate));
            }
            let report = gateway.delete_by_text(&canonical)?;
            println!(
                "Deleted {} observation(s) of {}, removed {} artifact(s)",
                report.rows, canonical, report.artifacts_removed
            );
        }
        Command::Purge { yes } => {
            if !yes {
                return Err(anyhow!("refusing to purge without --yes"));
            }
            let report = gateway.delete_all()?;
            log::warn!("purged datastore {}", cfg.db_path);
            println!(
                "Deleted {} observation(s), removed {} artifact(s)",
                report.rows, report.artifacts_removed
            );
        }
    }
    Ok(())
}
