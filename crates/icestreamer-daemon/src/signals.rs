//! Signal handling for orderly shutdown.

use anyhow::{Context, Result};
use futures::StreamExt;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::low_level::signal_name;
use signal_hook_tokio::Signals;
use tokio::sync::mpsc;
use tracing::debug;

/// Set up signal handlers for orderly shutdown.
///
/// Returns a receiver that yields the name of every interrupt, terminate or
/// hangup signal, delivered on the event loop rather than in signal context.
pub fn setup_signal_handlers() -> Result<mpsc::Receiver<String>> {
    let signals = Signals::new([SIGINT, SIGTERM, SIGHUP]).context("Failed to install signal handlers")?;
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(forward(signals, tx));
    Ok(rx)
}

async fn forward(mut signals: Signals, tx: mpsc::Sender<String>) {
    while let Some(signal) = signals.next().await {
        let name = signal_name(signal).map_or_else(|| signal.to_string(), str::to_string);
        debug!(signal = %name, "Signal delivered");
        if tx.send(name).await.is_err() {
            break;
        }
    }
    signals.handle().close();
}
