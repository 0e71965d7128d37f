//! Follow-up actions produced by the supervisor.
//!
//! Actions are returned by [`Supervisor::handle`](crate::Supervisor::handle)
//! so that the owner of the media graph and the event loop can carry them
//! out with mutable access.

use std::time::Duration;

use crate::event::ShutdownReason;
use crate::metadata::NowPlaying;

/// A state mutation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Unlink a branch from the fan-out and stop it
    DetachBranch(String),
    /// Link a branch to a fresh fan-out port and start it
    ReattachBranch(String),
    /// Arm the shared reconnect timer
    ArmReconnectTimer(Duration),
    /// Push replace-merge tags through the whole graph
    BroadcastTags(NowPlaying),
    /// Stop watching the metadata file
    CancelMetadataWatch,
    /// Release metadata resources, stop the status display and the loop
    Shutdown(ShutdownReason),
}
