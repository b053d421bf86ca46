//! coursesync - track lesson completion locally and sync it to the learning platform.
//!
//! Progress is stored under the data directory and survives restarts. Each
//! mutating command finishes with a batch sync, since the process exits long
//! before a debounce window would elapse.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use coursesync_core::{
    ApiClient, CatalogClient, Config, EngineOptions, FileStore, HttpBeacon, ProgressEngine,
    SyncOutcome, SyncReport,
};

// ============================================================================
// Constants
// ============================================================================

/// Log file name inside the data directory's `logs` folder
const LOG_FILE: &str = "coursesync.log";

/// How long `flush` keeps the runtime alive for the detached beacon request
const BEACON_GRACE_MS: u64 = 1500;

const USAGE: &str = "\
Usage: coursesync <command>

Commands:
  status [<course> <total>]              Show sync status, optionally one course's progress
  complete <course> <video> <total>      Mark a lesson complete and sync
  incomplete <course> <video> <total>    Mark a lesson incomplete and sync
  sync                                   Sync every course now
  courses                                Fetch the catalog and show progress per course
  flush                                  Send all progress as a fire-and-forget beacon
  help                                   Show this message

Environment:
  COURSESYNC_API_URL   Base URL of the learning platform API
  COURSESYNC_TOKEN     Bearer token for API requests
  RUST_LOG             Log filter (default: warn)";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Status { course: Option<(i64, u32)> },
    Complete { course: i64, video: i64, total: u32 },
    Incomplete { course: i64, video: i64, total: u32 },
    Sync,
    Courses,
    Flush,
    Help,
}

fn parse_arg<T: std::str::FromStr>(args: &[String], index: usize, name: &str) -> Result<T> {
    let raw = args
        .get(index)
        .with_context(|| format!("Missing <{}>", name))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid <{}>: {}", name, raw))
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            return Ok(Command::Help);
        };

        let command = match name.as_str() {
            "status" => match args.len() {
                1 => Command::Status { course: None },
                3 => Command::Status {
                    course: Some((parse_arg(args, 1, "course")?, parse_arg(args, 2, "total")?)),
                },
                _ => bail!("status takes either no arguments or <course> <total>"),
            },
            "complete" | "incomplete" => {
                if args.len() != 4 {
                    bail!("{} takes <course> <video> <total>", name);
                }
                let course = parse_arg(args, 1, "course")?;
                let video = parse_arg(args, 2, "video")?;
                let total = parse_arg(args, 3, "total")?;
                if name == "complete" {
                    Command::Complete { course, video, total }
                } else {
                    Command::Incomplete { course, video, total }
                }
            }
            "sync" => Command::Sync,
            "courses" => Command::Courses,
            "flush" => Command::Flush,
            "help" | "--help" | "-h" => Command::Help,
            other => bail!("Unknown command: {}", other),
        };
        Ok(command)
    }
}

/// Initialize the tracing subscriber: stderr plus a log file when the directory is usable.
fn init_tracing(log_dir: &Path) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn print_report(report: &SyncReport) {
    match &report.outcome {
        SyncOutcome::Sent => println!("Synced {} course(s)", report.updates.len()),
        SyncOutcome::Failed(e) => println!("Sync failed, progress kept locally: {}", e),
        SyncOutcome::SkippedInFlight => println!("A sync is already running"),
        SyncOutcome::NothingToSend => println!("Nothing to sync"),
    }
    for update in &report.updates {
        println!("  course {:>6}  {:>3}%", update.course_id, update.percent);
    }
    if report.skipped_without_total > 0 {
        println!(
            "  {} course(s) skipped: total video count unknown",
            report.skipped_without_total
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let data_dir = config.data_dir()?;

    let _log_guard = init_tracing(&data_dir.join("logs"));
    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }
    info!(?command, "coursesync starting");

    let kv = Arc::new(FileStore::new(data_dir).context("Failed to open progress storage")?);
    let mut api = ApiClient::new(config.api_base_url.clone())?;
    if let Some(token) = config.api_token.clone() {
        api.set_token(token);
    }
    let beacon = Arc::new(HttpBeacon::new(api.http().clone()));
    let engine = ProgressEngine::new(
        kv,
        Arc::new(api.clone()),
        beacon,
        EngineOptions::from_config(&config),
    );

    run(command, &engine, &api, &config).await
}

async fn run(command: Command, engine: &ProgressEngine, api: &ApiClient, config: &Config) -> Result<()> {
    match command {
        Command::Status { course } => {
            println!("{}", serde_json::to_string_pretty(&engine.status())?);
            if let Some((course_id, total)) = course {
                println!(
                    "course {}: {} of {} complete, {}% local, {}% shown",
                    course_id,
                    engine.store().completed_count(course_id),
                    total,
                    engine.course_progress(course_id, total),
                    engine.display_progress(course_id, total),
                );
            }
        }
        Command::Complete { course, video, total } => {
            engine.mark_complete(course, video, total);
            engine.scheduler().cancel_pending();
            print_report(&engine.sync_now().await);
        }
        Command::Incomplete { course, video, total } => {
            engine.mark_incomplete(course, video, total);
            engine.scheduler().cancel_pending();
            print_report(&engine.sync_now().await);
        }
        Command::Sync => print_report(&engine.sync_now().await),
        Command::Courses => {
            let catalog = CatalogClient::new(api.clone(), config.catalog_ttls());
            let fetched = catalog
                .fetched_courses()
                .await
                .context("Failed to fetch courses")?;
            engine.apply_courses(&fetched.value, fetched.fetched_at);
            for course in &fetched.value {
                let total = course.known_total_videos().unwrap_or(0);
                println!(
                    "{:>6}  {:>3}%  {}",
                    course.id,
                    engine.display_progress(course.id, total),
                    course.title
                );
            }
        }
        Command::Flush => {
            let report = engine.teardown();
            if report.dispatched {
                println!("Beacon dispatched for {} course(s)", report.courses);
                tokio::time::sleep(Duration::from_millis(BEACON_GRACE_MS)).await;
            } else {
                println!("Nothing dispatched");
            }
        }
        Command::Help => println!("{}", USAGE),
    }
    Ok(())
}
