//! Media graph management.
//!
//! The graph owns the source, the fan-out and every branch. Branches are
//! addressed by group name; an owner table maps every node name inside a
//! branch back to that group so that engine messages can be attributed.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use icestreamer_core::{BranchInfo, BranchState, BranchStatus, NodeKind, NowPlaying, StreamerConfig};

use crate::branch::{build_branch, Branch};
use crate::engine::{EngineEvent, MediaEngine, NodeId, NodeState, PortDirection, PortId, RawFault};
use crate::error::{GraphError, GraphResult};
use crate::factory::NodeFactory;
use crate::source::{build_source, Source};

/// Name of the top-level pipeline.
pub const PIPELINE_NAME: &str = "icestreamer";
/// Name of the fan-out node.
pub const FAN_OUT_NAME: &str = "tee";
/// Level meter report interval, in nanoseconds.
pub const METER_INTERVAL_NS: u64 = 85_000_000;
/// Caps the meter chain converts to.
const METER_CAPS: &str = "audio/x-raw,channels=2";

/// Graph assembly options.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Attach a level meter to the fan-out for the status display
    pub level_meter: bool,
}

/// Level meter chain fed by its own fan-out port.
#[derive(Debug, Clone, Copy)]
struct Meter {
    level: NodeId,
}

/// The top-level media graph.
#[derive(Debug)]
pub struct MediaGraph<E: MediaEngine> {
    engine: E,
    pipeline: NodeId,
    source: Source,
    fan_out: NodeId,
    /// Branches in configuration order
    branches: Vec<Branch>,
    /// Fan-out port of every attached branch
    attachments: HashMap<String, PortId>,
    /// Node name -> owning branch
    owners: HashMap<String, String>,
    meter: Option<Meter>,
}

impl<E: MediaEngine> MediaGraph<E> {
    /// Build the whole graph described by `config`.
    ///
    /// Destinations that fail to build are logged and skipped. The returned
    /// graph is wired but not running.
    ///
    /// # Errors
    /// Returns an error if the source cannot be built, the fan-out cannot be
    /// wired, or no destination could be built.
    pub fn load(mut engine: E, config: &StreamerConfig, options: LoadOptions) -> GraphResult<Self> {
        let mut factory = NodeFactory::new(&mut engine);
        let source = build_source(&mut factory, config)?;

        let pipeline = factory.create(NodeKind::Pipeline, PIPELINE_NAME)?;
        let fan_out = factory.create(NodeKind::FanOut, FAN_OUT_NAME)?;
        factory.set(fan_out, "allow-not-linked", "true")?;

        engine.add_child(pipeline, source.container)?;
        engine.add_child(pipeline, fan_out)?;
        engine.link(source.container, fan_out).map_err(|source| GraphError::Link {
            what: "source with fan-out".to_string(),
            source,
        })?;

        let mut graph = Self {
            engine,
            pipeline,
            source,
            fan_out,
            branches: Vec::new(),
            attachments: HashMap::new(),
            owners: HashMap::new(),
            meter: None,
        };

        if options.level_meter {
            graph.meter = Some(graph.build_meter()?);
        }

        for group in config.destinations() {
            debug!(stream = group.name(), "Constructing stream");
            let branch = match build_branch(&mut NodeFactory::new(&mut graph.engine), group) {
                Ok(branch) => branch,
                Err(e) => {
                    warn!(stream = group.name(), error = %e, "Failed to construct stream");
                    continue;
                }
            };
            graph.add_branch(branch)?;
        }

        if graph.branches.is_empty() {
            return Err(GraphError::Load("No streams specified in the configuration file".to_string()));
        }

        info!(streams = graph.branches.len(), "Graph loaded");
        Ok(graph)
    }

    fn build_meter(&mut self) -> GraphResult<Meter> {
        let mut factory = NodeFactory::new(&mut self.engine);
        let convert = factory.create(NodeKind::Convert, "meter-convert")?;
        let filter = factory.create(NodeKind::Constraint, "meter-caps")?;
        let level = factory.create(NodeKind::Level, "meter")?;
        factory.set(filter, "caps", METER_CAPS)?;
        factory.set(level, "post-messages", "true")?;
        factory.set(level, "interval", &METER_INTERVAL_NS.to_string())?;

        for node in [convert, filter, level] {
            self.engine.add_child(self.pipeline, node)?;
        }

        let link_err = |source| GraphError::Link { what: "level meter".to_string(), source };
        let port = self.engine.request_port(self.fan_out)?;
        let input = self.engine.static_port(convert, PortDirection::Input)?;
        self.engine.link_ports(port, input).map_err(link_err)?;
        self.engine.link(convert, filter).map_err(link_err)?;
        self.engine.link(filter, level).map_err(link_err)?;

        Ok(Meter { level })
    }

    fn add_branch(&mut self, branch: Branch) -> GraphResult<()> {
        self.engine.add_child(self.pipeline, branch.container())?;
        let port = self.link_to_fan_out(&branch)?;

        for node in branch.node_names() {
            self.owners.insert(node.clone(), branch.name().to_string());
        }
        self.attachments.insert(branch.name().to_string(), port);
        self.branches.push(branch);
        Ok(())
    }

    /// Request a fan-out port and link it to the branch input.
    fn link_to_fan_out(&mut self, branch: &Branch) -> GraphResult<PortId> {
        let port = self.engine.request_port(self.fan_out)?;
        if let Err(source) = self.engine.link_ports(port, branch.input()) {
            if let Err(e) = self.engine.release_port(self.fan_out, port) {
                warn!(error = %e, "Failed to release fan-out port");
            }
            return Err(GraphError::Link { what: format!("fan-out to {}", branch.name()), source });
        }
        Ok(port)
    }

    fn find(&self, name: &str) -> GraphResult<&Branch> {
        self.branches
            .iter()
            .find(|b| b.name() == name)
            .ok_or_else(|| GraphError::UnknownBranch(name.to_string()))
    }

    /// Link a detached branch to a fresh fan-out port and start it.
    ///
    /// On failure the half-made attachment is rolled back and the branch
    /// stays detached.
    ///
    /// # Errors
    /// Returns an error if the branch is unknown, already attached, or the
    /// engine refuses the port, the link or the state change.
    pub fn attach(&mut self, name: &str) -> GraphResult<()> {
        if self.attachments.contains_key(name) {
            return Err(GraphError::AlreadyAttached(name.to_string()));
        }
        let branch = self.find(name)?.clone();

        let port = self.link_to_fan_out(&branch)?;
        if let Err(e) = self.engine.set_state(branch.container(), NodeState::Playing) {
            self.unwind(&branch, port);
            return Err(e.into());
        }

        self.attachments.insert(name.to_string(), port);
        Ok(())
    }

    fn unwind(&mut self, branch: &Branch, port: PortId) {
        let results = [
            self.engine.unlink_ports(port, branch.input()),
            self.engine.release_port(self.fan_out, port),
            self.engine.set_state(branch.container(), NodeState::Null),
        ];
        for e in results.into_iter().filter_map(Result::err) {
            warn!(stream = branch.name(), error = %e, "Failed to roll back attachment");
        }
    }

    /// Unlink a branch from the fan-out, release its port and stop it.
    ///
    /// Every step is attempted even if an earlier one fails, and the branch
    /// counts as detached either way.
    ///
    /// # Errors
    /// Returns an error if the branch is unknown or not attached, or the first
    /// engine failure.
    pub fn detach(&mut self, name: &str) -> GraphResult<()> {
        let branch = self.find(name)?.clone();
        let port = self.attachments.remove(name).ok_or_else(|| GraphError::NotAttached(name.to_string()))?;

        let results = [
            self.engine.unlink_ports(port, branch.input()),
            self.engine.release_port(self.fan_out, port),
            self.engine.set_state(branch.container(), NodeState::Null),
        ];
        match results.into_iter().find_map(Result::err) {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Start the whole graph.
    ///
    /// # Errors
    /// Returns an error if the engine cannot reach the playing state.
    pub fn play(&mut self) -> GraphResult<()> {
        self.engine.set_state(self.pipeline, NodeState::Playing)?;
        Ok(())
    }

    /// Bring the whole graph back to the inert state.
    ///
    /// # Errors
    /// Returns an error if the engine refuses the state change.
    pub fn stop(&mut self) -> GraphResult<()> {
        self.engine.set_state(self.pipeline, NodeState::Null)?;
        Ok(())
    }

    /// Push replace-merge artist/title tags through the whole graph.
    ///
    /// # Errors
    /// Returns an error if the engine rejects the tag event.
    pub fn broadcast_tags(&mut self, tags: &NowPlaying) -> GraphResult<()> {
        self.engine.send_tags(self.pipeline, tags)?;
        Ok(())
    }

    /// Start receiving engine messages.
    ///
    /// # Errors
    /// Returns an error if the engine's message stream is unavailable.
    pub fn subscribe(&mut self) -> GraphResult<mpsc::Receiver<EngineEvent>> {
        Ok(self.engine.subscribe(self.pipeline)?)
    }

    /// Branch owning the node that posted `fault`.
    ///
    /// The posting node's container is consulted first, then the node itself.
    #[must_use]
    pub fn resolve_owner(&self, fault: &RawFault) -> Option<&str> {
        [fault.parent.as_deref(), fault.source.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|name| self.owners.get(name))
            .map(String::as_str)
    }

    #[must_use]
    pub fn owner_of(&self, node: &str) -> Option<&str> {
        self.owners.get(node).map(String::as_str)
    }

    #[must_use]
    pub fn is_attached(&self, name: &str) -> bool {
        self.attachments.contains_key(name)
    }

    /// Fan-out port currently feeding `name`.
    #[must_use]
    pub fn attachment(&self, name: &str) -> Option<PortId> {
        self.attachments.get(name).copied()
    }

    #[must_use]
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    #[must_use]
    pub fn has_meter(&self) -> bool {
        self.meter.is_some()
    }

    #[must_use]
    pub fn source(&self) -> &Source {
        &self.source
    }

    #[must_use]
    pub fn pipeline(&self) -> NodeId {
        self.pipeline
    }

    #[must_use]
    pub fn fan_out(&self) -> NodeId {
        self.fan_out
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Running state of every branch in configuration order.
    #[must_use]
    pub fn branch_statuses(&self) -> Vec<BranchStatus> {
        self.branches
            .iter()
            .map(|b| BranchStatus {
                name: b.name().to_string(),
                state: if self.is_attached(b.name()) { BranchState::Active } else { BranchState::Detached },
            })
            .collect()
    }

    /// Static sender configuration of every branch.
    #[must_use]
    pub fn branch_info(&self) -> Vec<BranchInfo> {
        self.branches
            .iter()
            .map(|b| {
                let values = BranchInfo::PROPERTIES.iter().filter_map(|property| {
                    match self.engine.property(b.sender(), property) {
                        Ok(value) => value.map(|v| (*property, v)),
                        Err(e) => {
                            debug!(stream = b.name(), property, error = %e, "Property unavailable");
                            None
                        }
                    }
                });
                BranchInfo::from_properties(b.name(), values)
            })
            .collect()
    }

    /// Human-readable description of the assembled graph.
    #[must_use]
    pub fn topology(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let name = |node: NodeId| self.engine.node_name(node).unwrap_or_else(|_| node.to_string());

        let mut source = vec![name(self.source.capture)];
        source.extend(self.source.constraint.map(name));
        lines.push(format!("{} -> {}", source.join(" ! "), name(self.fan_out)));

        if let Some(meter) = self.meter {
            lines.push(format!("{} -> meter-convert ! meter-caps ! {}", name(self.fan_out), name(meter.level)));
        }
        for branch in &self.branches {
            let state = if self.is_attached(branch.name()) { "" } else { " (detached)" };
            lines.push(format!("{} -> {}{state}", name(self.fan_out), branch.node_names()[1..].join(" ! ")));
        }
        lines
    }
}
