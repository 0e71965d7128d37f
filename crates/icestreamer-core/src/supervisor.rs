//! Fault supervision and reconnect scheduling.
//!
//! Each branch is either ACTIVE (attached to a fan-out port) or DETACHED
//! (listed in the disconnected set, waiting for the reconnect timer). A
//! single timer serves every detached branch: it is armed when the first
//! branch drops and, when it fires, every listed branch is re-attached at
//! once.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::command::Action;
use crate::event::{LoopEvent, MetadataNotification, ShutdownReason};
use crate::fault::{Fault, FaultClass};
use crate::metadata::MetadataState;

/// Delay before a dropped branch is re-attached.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// State machine driven by the event loop.
#[derive(Debug)]
pub struct Supervisor {
    /// Detached branches in the order they dropped
    disconnected: Vec<String>,
    timer_armed: bool,
    reconnect_delay: Duration,
    metadata: MetadataState,
    metadata_enabled: bool,
    shutting_down: bool,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_reconnect_delay(RECONNECT_DELAY)
    }

    #[must_use]
    pub fn with_reconnect_delay(reconnect_delay: Duration) -> Self {
        Self {
            disconnected: Vec::new(),
            timer_armed: false,
            reconnect_delay,
            metadata: MetadataState::default(),
            metadata_enabled: true,
            shutting_down: false,
        }
    }

    /// Branches waiting to be re-attached.
    #[must_use]
    pub fn disconnected(&self) -> &[String] {
        &self.disconnected
    }

    #[must_use]
    pub fn is_disconnected(&self, branch: &str) -> bool {
        self.disconnected.iter().any(|b| b == branch)
    }

    #[must_use]
    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataState {
        &self.metadata
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Handle one event and return the actions it requires.
    pub fn handle(&mut self, event: LoopEvent) -> Vec<Action> {
        match event {
            LoopEvent::Fault(fault) => self.on_fault(&fault),
            LoopEvent::ReconnectTimer => self.on_timer(),
            LoopEvent::ReconnectFailed { branch } => self.on_reconnect_failed(branch),
            LoopEvent::Metadata(notification) => self.on_metadata(notification),
            LoopEvent::ShutdownRequested(reason) => self.shutdown(reason),
        }
    }

    fn on_fault(&mut self, fault: &Fault) -> Vec<Action> {
        let source = fault.source.as_deref().unwrap_or("unknown");

        match fault.classify() {
            FaultClass::Warning => {
                warn!(source, debug = ?fault.debug, "Engine warning: {}", fault.message);
                Vec::new()
            }
            FaultClass::Network { branch } => {
                warn!(source, branch = %branch, debug = ?fault.debug, "Network error: {}", fault.message);
                if self.shutting_down {
                    return Vec::new();
                }
                if self.is_disconnected(&branch) {
                    debug!(branch = %branch, "Branch already disconnected");
                    return Vec::new();
                }

                self.disconnected.push(branch.clone());
                let mut actions = vec![Action::DetachBranch(branch)];
                self.arm_timer(&mut actions);
                actions
            }
            FaultClass::Fatal => {
                error!(source, debug = ?fault.debug, "Engine reported a fatal error: {}", fault.message);
                self.shutdown(ShutdownReason::Fatal(fault.message.clone()))
            }
        }
    }

    fn on_timer(&mut self) -> Vec<Action> {
        self.timer_armed = false;
        if self.shutting_down {
            return Vec::new();
        }

        self.disconnected
            .drain(..)
            .map(|branch| {
                info!(branch = %branch, "Reconnecting");
                Action::ReattachBranch(branch)
            })
            .collect()
    }

    fn on_reconnect_failed(&mut self, branch: String) -> Vec<Action> {
        if self.shutting_down {
            return Vec::new();
        }

        warn!(branch = %branch, "Reconnect failed, will retry");
        let mut actions = Vec::new();
        if !self.is_disconnected(&branch) {
            self.disconnected.push(branch);
        }
        self.arm_timer(&mut actions);
        actions
    }

    fn on_metadata(&mut self, notification: MetadataNotification) -> Vec<Action> {
        if !self.metadata_enabled {
            return Vec::new();
        }

        match notification {
            MetadataNotification::Changed { kind, content } if kind.is_content_change() => {
                match self.metadata.update(&content) {
                    Ok(now_playing) => {
                        info!(artist = %now_playing.artist, title = %now_playing.title, "Got metadata");
                        vec![Action::BroadcastTags(now_playing.clone())]
                    }
                    Err(reason) => {
                        warn!(%reason, "Got malformed metadata");
                        Vec::new()
                    }
                }
            }
            MetadataNotification::Changed { kind, .. } | MetadataNotification::Other(kind) => {
                warn!(?kind, "Something unexpected happened to the metadata file, disabling metadata monitor");
                self.metadata_enabled = false;
                vec![Action::CancelMetadataWatch]
            }
            MetadataNotification::ReadFailed(reason) => {
                warn!(%reason, "Couldn't read metadata file, disabling metadata monitor");
                self.metadata_enabled = false;
                vec![Action::CancelMetadataWatch]
            }
        }
    }

    fn arm_timer(&mut self, actions: &mut Vec<Action>) {
        if !self.timer_armed && !self.disconnected.is_empty() {
            info!(delay = ?self.reconnect_delay, "Starting reconnection timer");
            self.timer_armed = true;
            actions.push(Action::ArmReconnectTimer(self.reconnect_delay));
        }
    }

    fn shutdown(&mut self, reason: ShutdownReason) -> Vec<Action> {
        if self.shutting_down {
            debug!(?reason, "Shutdown already in progress");
            return Vec::new();
        }
        self.shutting_down = true;
        self.metadata_enabled = false;
        vec![Action::Shutdown(reason)]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;
    use crate::event::WatchKind;
    use crate::fault::{FaultDomain, Severity};
    use crate::metadata::NowPlaying;

    fn network_fault(branch: &str) -> LoopEvent {
        LoopEvent::Fault(Fault {
            severity: Severity::Error,
            domain: FaultDomain::Resource,
            source: Some(format!("shout2send-{branch}")),
            branch: Some(branch.to_string()),
            message: "Could not connect to server".to_string(),
            debug: None,
        })
    }

    fn fatal_fault() -> LoopEvent {
        LoopEvent::Fault(Fault {
            severity: Severity::Error,
            domain: FaultDomain::Core,
            source: Some("vorbisenc-radio1".to_string()),
            branch: Some("radio1".to_string()),
            message: "Internal data stream error".to_string(),
            debug: None,
        })
    }

    fn changed(content: &[u8]) -> LoopEvent {
        LoopEvent::Metadata(MetadataNotification::Changed {
            kind: WatchKind::Changed,
            content: content.to_vec(),
        })
    }

    #[test]
    fn test_network_fault_detaches_and_arms_timer() {
        let mut sup = Supervisor::new();
        let actions = sup.handle(network_fault("radio1"));

        assert_eq!(
            actions,
            vec![
                Action::DetachBranch("radio1".to_string()),
                Action::ArmReconnectTimer(RECONNECT_DELAY),
            ]
        );
        assert_eq!(sup.disconnected(), ["radio1"]);
        assert!(sup.timer_armed());
    }

    #[test]
    fn test_second_fault_shares_the_timer() {
        let mut sup = Supervisor::new();
        sup.handle(network_fault("radio1"));
        let actions = sup.handle(network_fault("radio2"));

        assert_eq!(actions, vec![Action::DetachBranch("radio2".to_string())]);
        assert_eq!(sup.disconnected(), ["radio1", "radio2"]);
    }

    #[test]
    fn test_duplicate_fault_is_ignored() {
        let mut sup = Supervisor::new();
        sup.handle(network_fault("radio1"));
        assert!(sup.handle(network_fault("radio1")).is_empty());
        assert_eq!(sup.disconnected(), ["radio1"]);
    }

    #[test]
    fn test_timer_reattaches_everything_and_disarms() {
        let mut sup = Supervisor::new();
        sup.handle(network_fault("radio1"));
        sup.handle(network_fault("radio2"));

        let actions = sup.handle(LoopEvent::ReconnectTimer);
        assert_eq!(
            actions,
            vec![
                Action::ReattachBranch("radio1".to_string()),
                Action::ReattachBranch("radio2".to_string()),
            ]
        );
        assert!(sup.disconnected().is_empty());
        assert!(!sup.timer_armed());
    }

    #[test]
    fn test_failed_reconnect_is_requeued() {
        let mut sup = Supervisor::new();
        sup.handle(network_fault("radio1"));
        sup.handle(LoopEvent::ReconnectTimer);

        let actions = sup.handle(LoopEvent::ReconnectFailed { branch: "radio1".to_string() });
        assert_eq!(actions, vec![Action::ArmReconnectTimer(RECONNECT_DELAY)]);
        assert_eq!(sup.disconnected(), ["radio1"]);
        assert!(sup.timer_armed());
    }

    #[test]
    fn test_warning_changes_nothing() {
        let mut sup = Supervisor::new();
        let actions = sup.handle(LoopEvent::Fault(Fault {
            severity: Severity::Warning,
            domain: FaultDomain::Resource,
            source: Some("shout2send-radio1".to_string()),
            branch: Some("radio1".to_string()),
            message: "slow".to_string(),
            debug: None,
        }));
        assert!(actions.is_empty());
        assert!(sup.disconnected().is_empty());
        assert!(!sup.timer_armed());
    }

    #[test]
    fn test_fatal_error_shuts_down_exactly_once() {
        let mut sup = Supervisor::new();
        sup.handle(network_fault("radio1"));
        sup.handle(network_fault("radio2"));

        let actions = sup.handle(fatal_fault());
        assert_eq!(
            actions,
            vec![Action::Shutdown(ShutdownReason::Fatal("Internal data stream error".to_string()))]
        );

        assert!(sup.handle(fatal_fault()).is_empty());
        assert!(sup.handle(LoopEvent::ShutdownRequested(ShutdownReason::Signal("SIGINT".into()))).is_empty());
        assert!(sup.handle(LoopEvent::ReconnectTimer).is_empty());
        assert!(sup.is_shutting_down());
    }

    #[test]
    fn test_metadata_update_broadcasts_tags() {
        let mut sup = Supervisor::new();
        let actions = sup.handle(changed(b"Artist Name\nTrack Title\n"));
        assert_eq!(
            actions,
            vec![Action::BroadcastTags(NowPlaying {
                artist: "Artist Name".to_string(),
                title: "Track Title".to_string(),
            })]
        );
    }

    #[test]
    fn test_malformed_metadata_keeps_previous_state() {
        let mut sup = Supervisor::new();
        sup.handle(changed(b"Artist Name\nTrack Title\n"));

        assert!(sup.handle(changed(b"onlyoneline")).is_empty());
        assert!(sup.handle(changed(b"a\nb\nc\n")).is_empty());
        assert!(sup.handle(changed(b"")).is_empty());
        assert!(sup.handle(changed(&[0xc3, 0x28, b'\n', b'x'])).is_empty());

        let current = sup.metadata().current().expect("metadata kept");
        assert_eq!(current.artist, "Artist Name");
    }

    #[test]
    fn test_unexpected_watch_kind_cancels_metadata() {
        let mut sup = Supervisor::new();
        let actions = sup.handle(LoopEvent::Metadata(MetadataNotification::Other(WatchKind::Deleted)));
        assert_eq!(actions, vec![Action::CancelMetadataWatch]);

        // Further notifications are ignored once cancelled.
        assert!(sup.handle(changed(b"A\nB")).is_empty());
    }

    #[test]
    fn test_read_failure_cancels_metadata() {
        let mut sup = Supervisor::new();
        let actions = sup.handle(LoopEvent::Metadata(MetadataNotification::ReadFailed(
            "permission denied".to_string(),
        )));
        assert_eq!(actions, vec![Action::CancelMetadataWatch]);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Fault(usize),
        Warning(usize),
        Timer,
        Reattach { fail: bool },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0..3usize).prop_map(Step::Fault),
            (0..3usize).prop_map(Step::Warning),
            Just(Step::Timer),
            any::<bool>().prop_map(|fail| Step::Reattach { fail }),
        ]
    }

    const BRANCHES: [&str; 3] = ["radio1", "radio2", "radio3"];

    proptest! {
        #[test]
        fn prop_branch_is_attached_xor_disconnected(steps in prop::collection::vec(step(), 1..64)) {
            let mut sup = Supervisor::new();
            let mut attached: BTreeSet<String> = BRANCHES.iter().map(|b| (*b).to_string()).collect();
            let mut armed = 0usize;
            let mut fail_next = false;

            for step in steps {
                let event = match step {
                    Step::Fault(i) => network_fault(BRANCHES[i]),
                    Step::Warning(i) => LoopEvent::Fault(Fault {
                        severity: Severity::Warning,
                        domain: FaultDomain::Resource,
                        source: Some(format!("shout2send-{}", BRANCHES[i])),
                        branch: Some(BRANCHES[i].to_string()),
                        message: "warn".to_string(),
                        debug: None,
                    }),
                    Step::Timer if armed == 1 => LoopEvent::ReconnectTimer,
                    Step::Timer => continue,
                    Step::Reattach { fail } => {
                        fail_next = fail;
                        continue;
                    }
                };
                if matches!(event, LoopEvent::ReconnectTimer) {
                    armed = 0;
                }

                let mut pending = sup.handle(event);
                while let Some(action) = pending.pop() {
                    match action {
                        Action::DetachBranch(b) => prop_assert!(attached.remove(&b)),
                        Action::ReattachBranch(b) => {
                            if fail_next {
                                pending.extend(sup.handle(LoopEvent::ReconnectFailed { branch: b }));
                            } else {
                                prop_assert!(attached.insert(b));
                            }
                        }
                        Action::ArmReconnectTimer(_) => {
                            prop_assert_eq!(armed, 0);
                            armed += 1;
                        }
                        other => prop_assert!(false, "unexpected action {:?}", other),
                    }
                }

                for branch in BRANCHES {
                    prop_assert!(attached.contains(branch) != sup.is_disconnected(branch));
                }
                prop_assert_eq!(armed == 1, sup.timer_armed());
                prop_assert_eq!(sup.timer_armed(), !sup.disconnected().is_empty());
            }
        }
    }
}
