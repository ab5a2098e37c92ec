//! VTouch GW - Rust implementation
//!
//! Gateway turning skeletal hand tracking into multitouch contacts on a
//! virtual touch plane.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vtouch_gw::config::{AppConfig, FileSettingsSource, SettingsSource, SharedSettings};
use vtouch_gw::consumer::ConsoleConsumer;
use vtouch_gw::frame::{ChannelSink, FrameSink};
use vtouch_gw::paths::AppPaths;
use vtouch_gw::sensor::ReplaySource;
use vtouch_gw::TouchEngine;

/// VTouch Gateway - multitouch from skeletal hand tracking
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: ./config.yaml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write daily rolling log files (to DIR, or next to the config)
    #[arg(long, value_name = "DIR")]
    log_dir: Option<Option<PathBuf>>,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,

    /// Recorded tracker session to play back (JSON lines)
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Playback rate in Hz (default: filter sample rate)
    #[arg(long)]
    rate: Option<f64>,

    /// Restart the recording when it ends
    #[arg(long = "loop")]
    looping: bool,

    /// Deliver a frame every cycle, even without contacts
    #[arg(long)]
    always_notify: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = match &args.config {
        Some(path) => AppPaths::from_config(path),
        None => AppPaths::detect(),
    };

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&args, &paths)?;

    info!("Starting VTouch GW v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", paths.config.display());

    let config_exists = paths.config.exists();
    let mut config = if config_exists {
        AppConfig::load(&paths.config).await?
    } else {
        warn!(
            "⚠️  {} not found, using built-in defaults",
            paths.config.display()
        );
        AppConfig::default()
    };

    if args.always_notify {
        config.frames.always_notify = true;
    }

    if args.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let replay = args
        .replay
        .as_ref()
        .context("No skeleton source available: pass --replay <FILE> with a recorded session")?;
    let rate = args.rate.unwrap_or(config.filter.sample_rate);
    let source = ReplaySource::open(replay, rate, args.looping)
        .with_context(|| format!("Failed to open recording {}", replay.display()))?;

    // Touch settings follow edits of the config file while running
    let settings: Box<dyn SettingsSource> = if config_exists {
        Box::new(FileSettingsSource::new(&paths.config))
    } else {
        Box::new(SharedSettings::new(config.touch))
    };

    let (sink, rx) = ChannelSink::channel(config.frames.channel_capacity);
    let consumer = tokio::spawn(
        ConsoleConsumer::new("console")
            .show_empty(config.frames.always_notify)
            .run(rx),
    );

    let sink: Arc<dyn FrameSink> = Arc::new(sink);
    let engine = TouchEngine::start(&config, Box::new(source), settings, Some(sink))?;

    run_until_stopped(&engine).await;

    // Joining the loops blocks, keep it off the async workers
    let outcome = tokio::task::spawn_blocking(move || engine.shutdown())
        .await
        .context("Engine shutdown task failed")?;

    let totals = consumer.await.context("Consumer task failed")?;
    info!(
        "Consumer received {} frames ({} contacts)",
        totals.frames, totals.contacts
    );

    let report = outcome?;
    info!("Engine report: {}", serde_json::to_string(&report)?);
    info!("VTouch GW shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or for the processing loop to end on its own
async fn run_until_stopped(engine: &TouchEngine) {
    let mut check = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => warn!("Failed to listen for Ctrl+C ({}), stopping", e),
                }
                break;
            }
            _ = check.tick() => {
                if engine.is_finished() {
                    info!("Processing loop finished");
                    break;
                }
            }
        }
    }
}

fn init_logging(args: &Args, paths: &AppPaths) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let dir = match dir {
                Some(dir) => dir.clone(),
                None => {
                    paths.ensure_logs_dir()?;
                    paths.logs_dir.clone()
                }
            };
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let appender = tracing_appender::rolling::daily(&dir, "vtouch-gw.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (plain, json) = if args.json {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_thread_names(true),
            ),
        )
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .init();

    Ok(guard)
}
