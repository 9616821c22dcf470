use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate, NaiveTime, TimeZone};
use clap::{Parser, Subcommand};
use log::{info, warn};
use recsched::{
    config::{RecorderConfig, RecordingsDirProvider},
    discovery::discover_stores,
    job::{resolve_window, NewJob},
    store::{store_path, JobStore},
    RecorderFactory, Scheduler,
};
use std::fs;
use std::path::PathBuf;

/// Scheduled stream recording daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the scheduler loop (default)
    Run,
    /// Schedule a recording
    Add {
        /// Profile hash the job belongs to
        #[arg(long)]
        profile: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        url: String,
        /// Local start time, HH:MM
        #[arg(long)]
        start: String,
        /// Local end time, HH:MM; earlier than start means the next day
        #[arg(long)]
        end: String,
        /// Local date, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        program: Option<String>,
    },
    /// List scheduled recordings
    List {
        #[arg(long)]
        profile: Option<String>,
    },
    /// Remove a scheduled recording
    Delete {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = RecorderConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    match args.command.unwrap_or(Cmd::Run) {
        Cmd::Run => run(cfg).await,
        Cmd::Add { profile, channel, url, start, end, date, program } => {
            add(&cfg, profile, channel, url, &start, &end, date.as_deref(), program)
        }
        Cmd::List { profile } => list(&cfg, profile.as_deref()),
        Cmd::Delete { profile, id } => {
            let store = JobStore::open(store_path(&cfg.store_dir, &profile)?)
                .with_context(|| format!("Failed to open store for profile {}", profile))?;
            store.delete(id).with_context(|| format!("Failed to delete job {}", id))?;
            println!("Deleted job {} from profile {}", id, profile);
            Ok(())
        }
    }
}

async fn run(cfg: RecorderConfig) -> Result<()> {
    info!("Recording scheduler starting");
    info!("Configuration loaded:");
    info!("  Store dir: {}", cfg.store_dir.display());
    info!("  Recordings dir: {}", cfg.recordings_dir().display());
    info!("  Capture tool: {}", cfg.ffmpeg_bin.display());
    info!("  Poll interval: {}s", cfg.poll_interval_secs);
    info!("  Stop timeout: {}s", cfg.stop_timeout_secs);

    fs::create_dir_all(&cfg.store_dir)
        .with_context(|| format!("Failed to create store directory: {}", cfg.store_dir.display()))?;

    let recordings_dir = cfg.recordings_dir();
    if !recordings_dir.exists() {
        warn!("Recordings directory does not exist yet, it will be created on first recording: {}",
              recordings_dir.display());
    }

    let factory = RecorderFactory::from_config(&cfg);
    let mut scheduler = Scheduler::new(cfg, factory);
    scheduler.run().await.context("Failed to install signal handlers")?;

    info!("Recording scheduler stopped");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn add(
    cfg: &RecorderConfig,
    profile: String,
    channel: String,
    url: String,
    start: &str,
    end: &str,
    date: Option<&str>,
    program: Option<String>,
) -> Result<()> {
    let date = match date {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", d))?,
        None => Local::now().date_naive(),
    };
    let start = parse_time(start)?;
    let end = parse_time(end)?;
    let path = store_path(&cfg.store_dir, &profile)?;
    let (start_ts, end_ts) = resolve_window(&Local, date, start, end)
        .ok_or_else(|| anyhow!("{} {} does not exist in the local time zone", date, start))?;

    fs::create_dir_all(&cfg.store_dir)
        .with_context(|| format!("Failed to create store directory: {}", cfg.store_dir.display()))?;
    let store = JobStore::open(&path)
        .with_context(|| format!("Failed to open store for profile {}", profile))?;

    let job = NewJob::new(profile, channel, url, start_ts, end_ts, program);
    let id = store.add(&job).context("Failed to schedule recording")?;
    println!(
        "Scheduled job {}: {} from {} to {}",
        id,
        job.channel_name,
        format_ts(job.start_time),
        format_ts(job.end_time)
    );
    Ok(())
}

fn list(cfg: &RecorderConfig, profile: Option<&str>) -> Result<()> {
    let stores = discover_stores(&cfg.store_dir);
    if stores.is_empty() {
        println!("No profile stores in {}", cfg.store_dir.display());
        return Ok(());
    }

    for location in stores {
        if profile.is_some_and(|p| p != location.profile_id) {
            continue;
        }
        let jobs = match JobStore::open(&location.path).and_then(|s| s.list_all()) {
            Ok(jobs) => jobs,
            Err(e) => {
                eprintln!("profile {}: unreadable ({})", location.profile_id, e);
                continue;
            }
        };
        println!("profile {} ({} job(s))", location.profile_id, jobs.len());
        for job in jobs {
            println!(
                "  {:>4}  {:<9}  {}  ->  {}  {}",
                job.id,
                job.status.as_str(),
                format_ts(job.start_time),
                format_ts(job.end_time),
                job.display_name()
            );
        }
    }
    Ok(())
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .with_context(|| format!("Invalid time '{}', expected HH:MM", s))
}

fn format_ts(ts: i64) -> String {
    Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
