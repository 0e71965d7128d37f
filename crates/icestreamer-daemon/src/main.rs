//! IceStreamer daemon - live audio to Icecast.
//!
//! Captures one audio input, fans it out to every configured destination and
//! keeps each destination streaming: dropped connections are retried on a
//! shared timer and now-playing updates are pushed into every stream.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod metadata_watch;
mod signals;
mod status;

use icestreamer_core::{LoopEvent, ShutdownReason, StreamerConfig, Supervisor, UiRequest};
use icestreamer_engine::{LoadOptions, LoopAction, MediaEngine, MediaGraph, MemoryEngine, Streamer};

use crate::metadata_watch::MetadataWatch;
use crate::status::{Format, StatusDisplay};

/// Period of the branch state refresh sent to the status display.
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

const USAGE: &str = "\
Usage: icestreamer [OPTIONS]

Options:
  -c, --config <FILE>  Configuration file
  -g, --status         Show the console status display
      --json           Status display writes JSON lines (implies --status)
      --dry-run        Build the graph in memory, print it and exit
  -v, --verbose        Debug logging
  -h, --help           Print this help";

/// Command line options.
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    config: Option<PathBuf>,
    status: Option<Format>,
    dry_run: bool,
    verbose: bool,
}

/// Parse arguments (without the program name). `Ok(None)` means help was
/// requested.
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<Args>> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args.next().with_context(|| format!("{arg} needs a file argument"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "-g" | "--status" => {
                parsed.status.get_or_insert(Format::Text);
            }
            "--json" => parsed.status = Some(Format::Json),
            "--dry-run" => parsed.dry_run = true,
            "-v" | "--verbose" => parsed.verbose = true,
            "-h" | "--help" => return Ok(None),
            other => bail!("unknown argument '{other}'\n\n{USAGE}"),
        }
    }

    Ok(Some(parsed))
}

fn init_logging(verbose: bool) -> Result<()> {
    let mut filter = EnvFilter::from_default_env().add_directive("icestreamer=info".parse()?);
    if verbose {
        filter = filter
            .add_directive("icestreamer_daemon=debug".parse()?)
            .add_directive("icestreamer_engine=debug".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let Some(args) = parse_args(std::env::args().skip(1))? else {
        println!("{USAGE}");
        return Ok(());
    };
    init_logging(args.verbose)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting IceStreamer");

    let config = config::load_config(args.config.as_deref())?;
    info!(destinations = config.destinations().count(), "Configuration loaded");

    if args.dry_run {
        return dry_run(&config);
    }

    run_with_default_engine(config, &args).await
}

/// Build the graph against the in-memory engine and print it.
fn dry_run(config: &StreamerConfig) -> Result<()> {
    let options = LoadOptions { level_meter: false };
    let graph = MediaGraph::load(MemoryEngine::new(), config, options).context("Failed to build the streaming graph")?;

    for line in graph.topology() {
        println!("{line}");
    }
    info!(streams = graph.branches().len(), "Dry run complete");
    Ok(())
}

#[cfg(feature = "gstreamer")]
async fn run_with_default_engine(config: StreamerConfig, args: &Args) -> Result<()> {
    let engine = icestreamer_gst::GstEngine::new().context("Failed to initialise GStreamer")?;
    run(engine, config, args).await
}

#[cfg(not(feature = "gstreamer"))]
async fn run_with_default_engine(config: StreamerConfig, args: &Args) -> Result<()> {
    warn!("Built without GStreamer support; running against the in-memory engine, no audio is sent");
    run(MemoryEngine::new(), config, args).await
}

/// Run the streamer until a signal, a close request or a fatal fault.
async fn run<E: MediaEngine>(engine: E, config: StreamerConfig, args: &Args) -> Result<()> {
    let options = LoadOptions { level_meter: args.status.is_some() };
    let mut graph = MediaGraph::load(engine, &config, options).context("Failed to build the streaming graph")?;
    let mut engine_rx = graph.subscribe().context("Failed to subscribe to engine events")?;

    let (ui_tx, mut ui_rx) = mpsc::channel(4);
    let mut streamer = Streamer::new(graph, Supervisor::new());
    let display = match args.status {
        Some(format) => {
            let (display, status_tx) = StatusDisplay::spawn(format, ui_tx).context("Failed to start status display")?;
            streamer = streamer.with_status(status_tx);
            Some(display)
        }
        None => None,
    };

    streamer.start().context("Failed to start streaming")?;

    let (metadata_tx, mut metadata_rx) = mpsc::channel(8);
    let mut watch = match MetadataWatch::attach(config.metadata_file(), metadata_tx) {
        Ok(watch) => {
            debug!(path = ?watch.path(), "Live metadata enabled");
            Some(watch)
        }
        Err(e) => {
            warn!(error = %e, "Live metadata updates disabled");
            None
        }
    };

    let mut signal_rx = signals::setup_signal_handlers()?;
    let mut reconnect_at: Option<Instant> = None;
    let mut status_tick = tokio::time::interval(STATUS_INTERVAL);

    info!("IceStreamer running. Press Ctrl+C to exit.");

    let reason = loop {
        let actions = tokio::select! {
            Some(event) = engine_rx.recv() => streamer.handle_engine_event(event),

            Some(name) = signal_rx.recv() => {
                info!(signal = %name, "Shutdown signal received");
                streamer.handle(LoopEvent::ShutdownRequested(ShutdownReason::Signal(name)))
            }

            Some(notification) = metadata_rx.recv() => streamer.handle(LoopEvent::Metadata(notification)),

            () = reconnect_due(reconnect_at) => {
                reconnect_at = None;
                streamer.handle(LoopEvent::ReconnectTimer)
            }

            Some(UiRequest::Close) = ui_rx.recv() => {
                streamer.handle(LoopEvent::ShutdownRequested(ShutdownReason::CloseRequested))
            }

            _ = status_tick.tick(), if display.is_some() => {
                streamer.publish_branches();
                Vec::new()
            }
        };

        let mut shutdown = None;
        for action in actions {
            match action {
                LoopAction::ArmReconnectTimer(delay) => {
                    debug!(?delay, "Reconnect timer armed");
                    reconnect_at = Some(Instant::now() + delay);
                }
                LoopAction::CancelMetadataWatch => {
                    if let Some(watch) = watch.take() {
                        watch.cancel();
                    }
                }
                LoopAction::Shutdown(reason) => shutdown = Some(reason),
            }
        }

        if let Some(reason) = shutdown {
            break reason;
        }
    };

    match &reason {
        ShutdownReason::Fatal(message) => error!(%message, "Stopping after fatal error"),
        other => info!(reason = ?other, "Shutting down..."),
    }

    if let Some(watch) = watch.take() {
        watch.cancel();
    }
    if let Err(e) = streamer.shutdown() {
        warn!(error = %e, "Failed to stop the pipeline cleanly");
    }
    if let Some(display) = display {
        display.join();
    }

    info!("IceStreamer stopped");
    Ok(())
}

/// Completes when the reconnect deadline passes; never if none is set.
async fn reconnect_due(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
