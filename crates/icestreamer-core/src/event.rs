//! Events delivered to the event loop.

use serde::{Deserialize, Serialize};

use crate::fault::Fault;

/// Events that can trigger state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// The engine reported a warning or error
    Fault(Fault),
    /// The shared reconnect timer expired
    ReconnectTimer,
    /// A branch could not be re-attached
    ReconnectFailed { branch: String },
    /// The metadata watch reported something
    Metadata(MetadataNotification),
    /// Orderly shutdown was requested
    ShutdownRequested(ShutdownReason),
}

/// Kind of change reported by the metadata file watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    /// File content changed
    Changed,
    /// A batch of changes settled
    ChangesDoneHint,
    /// File was removed
    Deleted,
    /// File was (re)created
    Created,
    /// Permissions or timestamps changed
    AttributeChanged,
}

impl WatchKind {
    /// Whether this kind of notification is acted upon.
    #[must_use]
    pub fn is_content_change(self) -> bool {
        matches!(self, Self::Changed | Self::ChangesDoneHint)
    }
}

/// Notification from the metadata file watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataNotification {
    /// The file changed and was read
    Changed { kind: WatchKind, content: Vec<u8> },
    /// Any other kind of notification
    Other(WatchKind),
    /// The file could not be read after a change
    ReadFailed(String),
}

/// Why the streamer is shutting down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "detail")]
pub enum ShutdownReason {
    /// Interrupt, terminate or hangup signal
    Signal(String),
    /// The status display asked to close
    CloseRequested,
    /// A fatal engine error
    Fatal(String),
}
