//! The streamer context.
//!
//! [`Streamer`] owns the graph and the supervisor. The event loop feeds it
//! events; it carries out every graph mutation the supervisor asks for and
//! hands back the actions only the loop itself can perform.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use icestreamer_core::{Action, Fault, LoopEvent, ShutdownReason, StatusUpdate, Supervisor};

use crate::engine::{EngineEvent, MediaEngine, RawFault};
use crate::error::GraphResult;
use crate::graph::MediaGraph;

/// Channel count the level meter is constrained to.
const METER_CHANNELS: usize = 2;

/// Work left to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopAction {
    /// Arm the shared reconnect timer
    ArmReconnectTimer(Duration),
    /// Stop watching the metadata file
    CancelMetadataWatch,
    /// Tear down and leave the loop
    Shutdown(ShutdownReason),
}

/// Explicit process context: graph, supervisor and status channel.
pub struct Streamer<E: MediaEngine> {
    graph: MediaGraph<E>,
    supervisor: Supervisor,
    status: Option<std_mpsc::Sender<StatusUpdate>>,
}

impl<E: MediaEngine> Streamer<E> {
    #[must_use]
    pub fn new(graph: MediaGraph<E>, supervisor: Supervisor) -> Self {
        Self { graph, supervisor, status: None }
    }

    /// Push status snapshots to a display.
    #[must_use]
    pub fn with_status(mut self, status: std_mpsc::Sender<StatusUpdate>) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn graph(&self) -> &MediaGraph<E> {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut MediaGraph<E> {
        &mut self.graph
    }

    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Start the graph and publish the initial status.
    ///
    /// # Errors
    /// Returns an error if the graph cannot reach the playing state.
    pub fn start(&mut self) -> GraphResult<()> {
        self.graph.play()?;
        self.publish(StatusUpdate::Info { branches: self.graph.branch_info() });
        self.publish_branches();
        info!(streams = self.graph.branches().len(), "Streaming");
        Ok(())
    }

    /// Stop the status display and bring the graph back to the inert state.
    ///
    /// # Errors
    /// Returns an error if the engine refuses the state change.
    pub fn shutdown(&mut self) -> GraphResult<()> {
        self.publish(StatusUpdate::Stop);
        self.status = None;
        self.graph.stop()
    }

    /// Handle a loop event, carrying out every resulting graph action.
    pub fn handle(&mut self, event: LoopEvent) -> Vec<LoopAction> {
        let mut pending = VecDeque::from([event]);
        let mut out = Vec::new();
        let mut topology_changed = false;

        while let Some(event) = pending.pop_front() {
            for action in self.supervisor.handle(event) {
                match action {
                    Action::DetachBranch(branch) => {
                        topology_changed = true;
                        match self.graph.detach(&branch) {
                            Ok(()) => info!(stream = %branch, "Disconnected"),
                            Err(e) => warn!(stream = %branch, error = %e, "Failed to detach stream cleanly"),
                        }
                    }
                    Action::ReattachBranch(branch) => {
                        topology_changed = true;
                        match self.graph.attach(&branch) {
                            Ok(()) => info!(stream = %branch, "Reconnected"),
                            Err(e) => {
                                warn!(stream = %branch, error = %e, "Failed to reconnect");
                                pending.push_back(LoopEvent::ReconnectFailed { branch });
                            }
                        }
                    }
                    Action::BroadcastTags(tags) => {
                        if let Err(e) = self.graph.broadcast_tags(&tags) {
                            warn!(error = %e, "Failed to send tag event");
                        }
                    }
                    Action::ArmReconnectTimer(delay) => out.push(LoopAction::ArmReconnectTimer(delay)),
                    Action::CancelMetadataWatch => out.push(LoopAction::CancelMetadataWatch),
                    Action::Shutdown(reason) => out.push(LoopAction::Shutdown(reason)),
                }
            }
        }

        if topology_changed {
            self.publish_branches();
        }
        out
    }

    /// Handle a message from the engine.
    pub fn handle_engine_event(&mut self, event: EngineEvent) -> Vec<LoopAction> {
        match event {
            EngineEvent::Fault(raw) => {
                let fault = self.attribute(raw);
                self.handle(LoopEvent::Fault(fault))
            }
            EngineEvent::Level { running_time, rms } => {
                let [left, right] = rms.as_slice() else {
                    error!(
                        channels = rms.len(),
                        expected = METER_CHANNELS,
                        "Got wrong number of channels while updating levels, terminating"
                    );
                    return self.handle(LoopEvent::ShutdownRequested(ShutdownReason::Fatal(format!(
                        "level meter reported {} channels",
                        rms.len()
                    ))));
                };
                self.publish(StatusUpdate::Position { running_time });
                self.publish(StatusUpdate::Levels { left: *left, right: *right });
                Vec::new()
            }
            EngineEvent::EndOfStream => {
                warn!("Engine reported end of stream");
                Vec::new()
            }
        }
    }

    /// Attach the owning branch to a fault posted by the engine.
    fn attribute(&self, raw: RawFault) -> Fault {
        let branch = self.graph.resolve_owner(&raw).map(str::to_string);
        Fault {
            severity: raw.severity,
            domain: raw.domain,
            source: raw.source,
            branch,
            message: raw.message,
            debug: raw.debug,
        }
    }

    /// Publish the running state of every branch.
    pub fn publish_branches(&self) {
        self.publish(StatusUpdate::Branches { branches: self.graph.branch_statuses() });
    }

    fn publish(&self, update: StatusUpdate) {
        if let Some(status) = &self.status
            && status.send(update).is_err()
        {
            debug!("Status display is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use icestreamer_core::{
        BranchState, FaultDomain, Group, MetadataNotification, NowPlaying, Severity, StreamerConfig, WatchKind,
        RECONNECT_DELAY,
    };

    use super::*;
    use crate::engine::NodeState;
    use crate::graph::{LoadOptions, FAN_OUT_NAME};
    use crate::memory::MemoryEngine;

    fn streamer(options: LoadOptions) -> (Streamer<MemoryEngine>, std_mpsc::Receiver<StatusUpdate>) {
        let config = StreamerConfig::new()
            .with(Group::new("input").with("source", "test"))
            .and_then(|c| c.with(Group::new("radio1").with("encoder", "vorbis").with("container", "ogg")))
            .and_then(|c| c.with(Group::new("radio2").with("encoder", "opus").with("container", "webm")))
            .expect("valid config");
        let graph = MediaGraph::load(MemoryEngine::new(), &config, options).expect("loaded");
        let (tx, rx) = std_mpsc::channel();
        let mut streamer = Streamer::new(graph, Supervisor::new()).with_status(tx);
        streamer.start().expect("started");
        (streamer, rx)
    }

    fn network_error(branch: &str) -> EngineEvent {
        EngineEvent::Fault(RawFault {
            severity: Severity::Error,
            domain: FaultDomain::Resource,
            source: Some(format!("shout2send-{branch}")),
            parent: Some(format!("bin-{branch}")),
            message: "Could not connect to server".to_string(),
            debug: Some("shout_open failed".to_string()),
        })
    }

    fn fatal_error() -> EngineEvent {
        EngineEvent::Fault(RawFault {
            severity: Severity::Error,
            domain: FaultDomain::Stream,
            source: Some("audiotestsrc-input".to_string()),
            parent: Some("source_bin".to_string()),
            message: "Internal data stream error".to_string(),
            debug: None,
        })
    }

    fn last_branches(rx: &std_mpsc::Receiver<StatusUpdate>) -> Vec<(String, BranchState)> {
        let mut last = Vec::new();
        for update in rx.try_iter() {
            if let StatusUpdate::Branches { branches } = update {
                last = branches.into_iter().map(|b| (b.name, b.state)).collect();
            }
        }
        last
    }

    #[test]
    fn test_network_fault_detaches_branch_and_arms_timer() {
        let (mut streamer, rx) = streamer(LoadOptions::default());

        let actions = streamer.handle_engine_event(network_error("radio1"));

        assert_eq!(actions, vec![LoopAction::ArmReconnectTimer(RECONNECT_DELAY)]);
        assert!(!streamer.graph().is_attached("radio1"));
        assert!(streamer.graph().is_attached("radio2"));
        assert_eq!(streamer.supervisor().disconnected(), ["radio1"]);
        assert_eq!(streamer.graph().engine().state_of("bin-radio1"), Some(NodeState::Null));
        assert_eq!(streamer.graph().engine().requested_ports(FAN_OUT_NAME), 1);
        assert_eq!(
            last_branches(&rx),
            [("radio1".to_string(), BranchState::Detached), ("radio2".to_string(), BranchState::Active)]
        );
    }

    #[test]
    fn test_timer_reattaches_every_detached_branch() {
        let (mut streamer, rx) = streamer(LoadOptions::default());
        let before = streamer.graph().attachment("radio1");

        streamer.handle_engine_event(network_error("radio1"));
        let actions = streamer.handle_engine_event(network_error("radio2"));
        assert!(actions.is_empty());

        let actions = streamer.handle(LoopEvent::ReconnectTimer);
        assert!(actions.is_empty());
        assert!(streamer.graph().is_attached("radio1"));
        assert!(streamer.graph().is_attached("radio2"));
        assert_ne!(streamer.graph().attachment("radio1"), before);
        assert!(streamer.supervisor().disconnected().is_empty());
        assert!(!streamer.supervisor().timer_armed());
        assert_eq!(streamer.graph().engine().state_of("bin-radio2"), Some(NodeState::Playing));
        assert_eq!(
            last_branches(&rx),
            [("radio1".to_string(), BranchState::Active), ("radio2".to_string(), BranchState::Active)]
        );
    }

    #[test]
    fn test_failed_reconnect_is_retried() {
        let (mut streamer, _rx) = streamer(LoadOptions::default());
        streamer.handle_engine_event(network_error("radio1"));

        streamer.graph_mut().engine_mut().set_port_requests_fail(true);
        let actions = streamer.handle(LoopEvent::ReconnectTimer);
        assert_eq!(actions, vec![LoopAction::ArmReconnectTimer(RECONNECT_DELAY)]);
        assert!(!streamer.graph().is_attached("radio1"));
        assert_eq!(streamer.supervisor().disconnected(), ["radio1"]);

        streamer.graph_mut().engine_mut().set_port_requests_fail(false);
        assert!(streamer.handle(LoopEvent::ReconnectTimer).is_empty());
        assert!(streamer.graph().is_attached("radio1"));
    }

    #[test]
    fn test_repeated_fault_for_detached_branch_is_ignored() {
        let (mut streamer, _rx) = streamer(LoadOptions::default());
        streamer.handle_engine_event(network_error("radio1"));
        assert!(streamer.handle_engine_event(network_error("radio1")).is_empty());
        assert_eq!(streamer.supervisor().disconnected(), ["radio1"]);
    }

    #[test]
    fn test_warning_changes_nothing() {
        let (mut streamer, _rx) = streamer(LoadOptions::default());
        let actions = streamer.handle_engine_event(EngineEvent::Fault(RawFault {
            severity: Severity::Warning,
            domain: FaultDomain::Resource,
            source: Some("shout2send-radio1".to_string()),
            parent: Some("bin-radio1".to_string()),
            message: "slow".to_string(),
            debug: None,
        }));
        assert!(actions.is_empty());
        assert!(streamer.graph().is_attached("radio1"));
    }

    #[test]
    fn test_fatal_error_shuts_down_once_with_detached_branches() {
        let (mut streamer, _rx) = streamer(LoadOptions::default());
        streamer.handle_engine_event(network_error("radio1"));
        streamer.handle_engine_event(network_error("radio2"));

        let actions = streamer.handle_engine_event(fatal_error());
        assert_eq!(
            actions,
            vec![LoopAction::Shutdown(ShutdownReason::Fatal("Internal data stream error".to_string()))]
        );
        assert!(streamer.handle_engine_event(fatal_error()).is_empty());
        assert!(streamer.handle(LoopEvent::ReconnectTimer).is_empty());
    }

    #[test]
    fn test_sender_fault_outside_any_branch_is_fatal() {
        let (mut streamer, _rx) = streamer(LoadOptions::default());
        let actions = streamer.handle_engine_event(EngineEvent::Fault(RawFault {
            severity: Severity::Error,
            domain: FaultDomain::Resource,
            source: Some("shout2send-ghost".to_string()),
            parent: None,
            message: "gone".to_string(),
            debug: None,
        }));
        assert!(matches!(actions.as_slice(), [LoopAction::Shutdown(ShutdownReason::Fatal(_))]));
    }

    #[test]
    fn test_metadata_change_broadcasts_tags() {
        let (mut streamer, _rx) = streamer(LoadOptions::default());

        let actions = streamer.handle(LoopEvent::Metadata(MetadataNotification::Changed {
            kind: WatchKind::Changed,
            content: b"Artist Name\nTrack Title\n".to_vec(),
        }));
        assert!(actions.is_empty());

        let expected = NowPlaying { artist: "Artist Name".to_string(), title: "Track Title".to_string() };
        assert_eq!(streamer.graph().engine().sent_tags(), [("icestreamer".to_string(), expected)]);

        streamer.handle(LoopEvent::Metadata(MetadataNotification::Changed {
            kind: WatchKind::ChangesDoneHint,
            content: b"onlyoneline".to_vec(),
        }));
        assert_eq!(streamer.graph().engine().sent_tags().len(), 1);
    }

    #[test]
    fn test_metadata_file_removal_cancels_watch() {
        let (mut streamer, _rx) = streamer(LoadOptions::default());
        let actions = streamer.handle(LoopEvent::Metadata(MetadataNotification::Other(WatchKind::Deleted)));
        assert_eq!(actions, vec![LoopAction::CancelMetadataWatch]);
    }

    #[test]
    fn test_levels_are_published() {
        let (mut streamer, rx) = streamer(LoadOptions { level_meter: true });
        let _ = rx.try_iter().count();

        let actions = streamer.handle_engine_event(EngineEvent::Level {
            running_time: Duration::from_millis(1500),
            rms: vec![-12.0, -14.5],
        });
        assert!(actions.is_empty());

        let updates: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            updates,
            vec![
                StatusUpdate::Position { running_time: Duration::from_millis(1500) },
                StatusUpdate::Levels { left: -12.0, right: -14.5 },
            ]
        );
    }

    #[test]
    fn test_wrong_channel_count_is_fatal() {
        let (mut streamer, _rx) = streamer(LoadOptions { level_meter: true });
        let actions = streamer.handle_engine_event(EngineEvent::Level {
            running_time: Duration::ZERO,
            rms: vec![-12.0],
        });
        assert!(matches!(actions.as_slice(), [LoopAction::Shutdown(ShutdownReason::Fatal(_))]));
    }

    #[test]
    fn test_shutdown_stops_display_and_graph() {
        let (mut streamer, rx) = streamer(LoadOptions::default());
        streamer.shutdown().expect("stopped");

        assert_eq!(rx.try_iter().last(), Some(StatusUpdate::Stop));
        assert_eq!(streamer.graph().engine().state_of("icestreamer"), Some(NodeState::Null));
    }
}
