//! The media engine seam.
//!
//! Graph assembly only talks to the engine through [`MediaEngine`]. The
//! production implementation drives GStreamer; [`MemoryEngine`](crate::MemoryEngine)
//! keeps an arena of nodes in process.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use icestreamer_core::{FaultDomain, NowPlaying, Severity};

use crate::error::EngineResult;

/// Stable handle of a node created by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Stable handle of a port owned by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Port direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port (receives data)
    Input,
    /// Output port (produces data)
    Output,
}

/// Node running state, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeState {
    /// Inert, no resources held
    Null,
    /// Resources acquired, not processing
    Ready,
    /// Prerolled
    Paused,
    /// Processing data
    Playing,
}

/// Description of one node property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySpec {
    pub name: String,
    pub writable: bool,
    /// Only settable while the node is being constructed
    pub construct_only: bool,
}

impl PropertySpec {
    /// Whether a configuration value may be applied after construction.
    #[must_use]
    pub fn settable(&self) -> bool {
        self.writable && !self.construct_only
    }
}

/// A fault as posted on the engine's message stream.
///
/// The owning branch is resolved later by the graph, from `parent` or from
/// `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFault {
    pub severity: Severity,
    pub domain: FaultDomain,
    /// Name of the posting node
    pub source: Option<String>,
    /// Name of the posting node's container
    pub parent: Option<String>,
    pub message: String,
    pub debug: Option<String>,
}

/// Message from the running engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Warning or error
    Fault(RawFault),
    /// Level meter report: running time and RMS dB per channel
    Level { running_time: Duration, rms: Vec<f64> },
    /// The stream ended
    EndOfStream,
}

/// Media-processing engine operations used by the graph.
///
/// Nodes are inert when created. Containers own the nodes added to them and
/// propagate state changes to their children.
#[cfg_attr(test, mockall::automock)]
pub trait MediaEngine {
    /// Create a node from the named factory.
    fn create_node(&mut self, factory: &str, name: &str) -> EngineResult<NodeId>;

    /// Destroy a node that is not part of a running graph.
    ///
    /// The node is taken out of its container first. Children of a removed
    /// container go with it.
    fn remove_node(&mut self, node: NodeId) -> EngineResult<()>;

    /// Name the node was created with.
    fn node_name(&self, node: NodeId) -> EngineResult<String>;

    /// Properties the node exposes.
    fn properties(&self, node: NodeId) -> EngineResult<Vec<PropertySpec>>;

    /// Set a property from its string form.
    fn set_property(&mut self, node: NodeId, name: &str, value: &str) -> EngineResult<()>;

    /// Current value of a property in string form.
    fn property(&self, node: NodeId, name: &str) -> EngineResult<Option<String>>;

    /// Move `child` into `container`.
    fn add_child(&mut self, container: NodeId, child: NodeId) -> EngineResult<()>;

    /// Link the default output of `from` to the default input of `to`.
    fn link(&mut self, from: NodeId, to: NodeId) -> EngineResult<()>;

    /// Always-present port of a node.
    fn static_port(&mut self, node: NodeId, direction: PortDirection) -> EngineResult<PortId>;

    /// Expose a child's port on the container that owns it.
    fn expose_port(&mut self, container: NodeId, target: PortId) -> EngineResult<PortId>;

    /// Create a new output port on a fan-out node.
    fn request_port(&mut self, node: NodeId) -> EngineResult<PortId>;

    /// Release a port obtained with [`request_port`](Self::request_port).
    fn release_port(&mut self, node: NodeId, port: PortId) -> EngineResult<()>;

    fn link_ports(&mut self, output: PortId, input: PortId) -> EngineResult<()>;

    fn unlink_ports(&mut self, output: PortId, input: PortId) -> EngineResult<()>;

    fn set_state(&mut self, node: NodeId, state: NodeState) -> EngineResult<()>;

    /// Make the node's tag setter replace rather than merge tags.
    fn set_tag_merge_replace(&mut self, node: NodeId) -> EngineResult<()>;

    /// Send a global artist/title tag event through `node`.
    fn send_tags(&mut self, node: NodeId, tags: &NowPlaying) -> EngineResult<()>;

    /// Start delivering engine messages for the top-level `pipeline`.
    fn subscribe(&mut self, pipeline: NodeId) -> EngineResult<mpsc::Receiver<EngineEvent>>;
}
