//! Now-playing file watch.
//!
//! The file is polled; a change in size, modification time or identity is
//! reported to the event loop as a [`MetadataNotification`] carrying the new
//! content. Parsing and validation happen on the loop.

use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use icestreamer_core::{MetadataError, MetadataNotification, WatchKind};

/// Default polling period.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Identity and version of the watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    device: u64,
    inode: u64,
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(meta: &std::fs::Metadata) -> Self {
        Self { device: meta.dev(), inode: meta.ino(), len: meta.len(), modified: meta.modified().ok() }
    }

    fn same_file(&self, other: &Self) -> bool {
        self.device == other.device && self.inode == other.inode
    }
}

/// A running watch on the now-playing file.
#[derive(Debug)]
pub struct MetadataWatch {
    path: PathBuf,
    token: CancellationToken,
}

impl MetadataWatch {
    /// Start watching `path`, sending notifications to `tx`.
    ///
    /// One `Changed` notification with the current content is sent right
    /// away so metadata present at startup is picked up.
    ///
    /// # Errors
    /// Returns an error if no path is configured, the file does not exist, or
    /// its metadata cannot be read.
    pub fn attach(path: Option<PathBuf>, tx: mpsc::Sender<MetadataNotification>) -> Result<Self, MetadataError> {
        Self::attach_with_interval(path, tx, POLL_INTERVAL)
    }

    /// Like [`attach`](Self::attach) with a custom polling period.
    ///
    /// # Errors
    /// See [`attach`](Self::attach).
    pub fn attach_with_interval(
        path: Option<PathBuf>,
        tx: mpsc::Sender<MetadataNotification>,
        interval: Duration,
    ) -> Result<Self, MetadataError> {
        let path = path.ok_or(MetadataError::NotConfigured)?;
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(MetadataError::Missing(path)),
            Err(e) => return Err(MetadataError::Watch(e)),
        };

        let token = CancellationToken::new();
        let poller = Poller { path: path.clone(), tx, last: Fingerprint::of(&meta), dirty: false };
        tokio::spawn(poller.run(token.clone(), interval));

        info!(?path, "Watching metadata file");
        Ok(Self { path, token })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop watching.
    pub fn cancel(self) {
        self.token.cancel();
        debug!(path = ?self.path, "Metadata watch cancelled");
    }
}

struct Poller {
    path: PathBuf,
    tx: mpsc::Sender<MetadataNotification>,
    last: Fingerprint,
    dirty: bool,
}

impl Poller {
    async fn run(mut self, token: CancellationToken, interval: Duration) {
        if !self.report_content(WatchKind::Changed).await {
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.poll().await {
                        break;
                    }
                }
            }
        }
    }

    /// Check the file once. Returns `false` once the watch must end.
    async fn poll(&mut self) -> bool {
        let current = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Fingerprint::of(&meta),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = ?self.path, "Metadata file removed");
                self.send(MetadataNotification::Other(WatchKind::Deleted)).await;
                return false;
            }
            Err(e) => {
                self.send(MetadataNotification::ReadFailed(e.to_string())).await;
                return false;
            }
        };

        if !current.same_file(&self.last) {
            info!(path = ?self.path, "Metadata file replaced");
            self.send(MetadataNotification::Other(WatchKind::Created)).await;
            return false;
        }

        if current != self.last {
            self.last = current;
            self.dirty = true;
            return self.report_content(WatchKind::Changed).await;
        }

        if self.dirty {
            self.dirty = false;
            return self.report_content(WatchKind::ChangesDoneHint).await;
        }

        true
    }

    /// Read the file and report it. Returns `false` once the watch must end.
    async fn report_content(&mut self, kind: WatchKind) -> bool {
        match tokio::fs::read(&self.path).await {
            Ok(content) => self.send(MetadataNotification::Changed { kind, content }).await,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Could not read metadata file");
                self.send(MetadataNotification::ReadFailed(e.to_string())).await;
                false
            }
        }
    }

    async fn send(&self, notification: MetadataNotification) -> bool {
        self.tx.send(notification).await.is_ok()
    }
}
