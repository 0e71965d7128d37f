//! In-process media engine.
//!
//! Keeps an arena of nodes and ports addressed by id and validates property
//! values against a table of the node kinds the streamer uses. Nothing is
//! processed; the engine exists so graphs can be assembled and driven
//! without GStreamer, for tests and `--dry-run`.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use icestreamer_core::NowPlaying;

use crate::engine::{EngineEvent, MediaEngine, NodeId, NodeState, PortDirection, PortId, PropertySpec};
use crate::error::{EngineError, EngineResult};

/// Capacity of the event channel handed out by `subscribe`.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Bool,
    Int,
    UInt,
    Float,
    Str,
    Enum(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadWrite,
    ReadOnly,
}

type PropertyTable = &'static [(&'static str, ValueKind, Access)];

use Access::{ReadOnly, ReadWrite};
use ValueKind::{Bool, Enum, Float, Int, Str, UInt};

const CONTAINER_PROPS: PropertyTable = &[("async-handling", Bool, ReadWrite), ("message-forward", Bool, ReadWrite)];
const AUTO_PROPS: PropertyTable = &[("filter-caps", Str, ReadWrite)];
const ALSA_PROPS: PropertyTable = &[
    ("device", Str, ReadWrite),
    ("buffer-time", Int, ReadWrite),
    ("latency-time", Int, ReadWrite),
    ("provide-clock", Bool, ReadWrite),
];
const PULSE_PROPS: PropertyTable = &[
    ("device", Str, ReadWrite),
    ("server", Str, ReadWrite),
    ("client-name", Str, ReadWrite),
    ("volume", Float, ReadWrite),
    ("mute", Bool, ReadWrite),
];
const JACK_PROPS: PropertyTable = &[
    ("connect", Enum(&["none", "auto", "auto-forced", "explicit"]), ReadWrite),
    ("server", Str, ReadWrite),
    ("client-name", Str, ReadWrite),
    ("port-pattern", Str, ReadWrite),
];
const PIPEWIRE_PROPS: PropertyTable = &[
    ("path", Str, ReadWrite),
    ("target-object", Str, ReadWrite),
    ("client-name", Str, ReadWrite),
    ("always-copy", Bool, ReadWrite),
];
const TEST_PROPS: PropertyTable = &[
    ("wave", Enum(&["sine", "square", "saw", "triangle", "silence", "white-noise", "pink-noise"]), ReadWrite),
    ("freq", Float, ReadWrite),
    ("volume", Float, ReadWrite),
    ("is-live", Bool, ReadWrite),
    ("samplesperbuffer", Int, ReadWrite),
];
const CAPSFILTER_PROPS: PropertyTable = &[("caps", Str, ReadWrite)];
const TEE_PROPS: PropertyTable = &[("allow-not-linked", Bool, ReadWrite), ("num-src-pads", Int, ReadOnly)];
const QUEUE_PROPS: PropertyTable = &[
    ("leaky", Enum(&["no", "upstream", "downstream"]), ReadWrite),
    ("max-size-buffers", UInt, ReadWrite),
    ("max-size-bytes", UInt, ReadWrite),
    ("max-size-time", UInt, ReadWrite),
    ("current-level-buffers", UInt, ReadOnly),
];
const CONVERT_PROPS: PropertyTable = &[("dithering", Enum(&["none", "rpdf", "tpdf", "tpdf-hf"]), ReadWrite)];
const RESAMPLE_PROPS: PropertyTable = &[("quality", Int, ReadWrite)];
const VORBIS_PROPS: PropertyTable = &[
    ("bitrate", Int, ReadWrite),
    ("max-bitrate", Int, ReadWrite),
    ("min-bitrate", Int, ReadWrite),
    ("quality", Float, ReadWrite),
    ("managed", Bool, ReadWrite),
    ("last-message", Str, ReadOnly),
];
const OPUS_PROPS: PropertyTable = &[
    ("bitrate", Int, ReadWrite),
    ("audio-type", Enum(&["generic", "voice", "restricted-lowdelay"]), ReadWrite),
    ("bitrate-type", Enum(&["cbr", "vbr", "constrained-vbr"]), ReadWrite),
    ("complexity", Int, ReadWrite),
];
const MP3_PROPS: PropertyTable = &[
    ("target", Enum(&["quality", "bitrate"]), ReadWrite),
    ("bitrate", Int, ReadWrite),
    ("cbr", Bool, ReadWrite),
    ("quality", Float, ReadWrite),
    ("encoding-engine-quality", Enum(&["fast", "standard", "high"]), ReadWrite),
    ("mono", Bool, ReadWrite),
];
const OGG_PROPS: PropertyTable = &[("max-delay", UInt, ReadWrite), ("max-page-delay", UInt, ReadWrite)];
const WEBM_PROPS: PropertyTable = &[
    ("streamable", Bool, ReadWrite),
    ("writing-app", Str, ReadWrite),
    ("min-index-interval", UInt, ReadWrite),
];
const SENDER_PROPS: PropertyTable = &[
    ("ip", Str, ReadWrite),
    ("port", Int, ReadWrite),
    ("password", Str, ReadWrite),
    ("username", Str, ReadWrite),
    ("public", Bool, ReadWrite),
    ("streamname", Str, ReadWrite),
    ("description", Str, ReadWrite),
    ("genre", Str, ReadWrite),
    ("url", Str, ReadWrite),
    ("protocol", Enum(&["xaudiocast", "icy", "http"]), ReadWrite),
    ("mount", Str, ReadWrite),
    ("timeout", UInt, ReadWrite),
    ("send-title-info", Bool, ReadWrite),
    ("user-agent", Str, ReadWrite),
];
const LEVEL_PROPS: PropertyTable = &[
    ("post-messages", Bool, ReadWrite),
    ("interval", UInt, ReadWrite),
    ("peak-ttl", UInt, ReadWrite),
    ("peak-falloff", Float, ReadWrite),
];

/// Static description of a known factory.
#[derive(Debug, Clone, Copy)]
struct FactoryInfo {
    properties: PropertyTable,
    input: bool,
    output: bool,
    container: bool,
    fan_out: bool,
    tag_setter: bool,
}

impl FactoryInfo {
    const fn element(properties: PropertyTable, input: bool, output: bool) -> Self {
        Self { properties, input, output, container: false, fan_out: false, tag_setter: false }
    }

    const fn tagged(self) -> Self {
        Self { tag_setter: true, ..self }
    }
}

fn factory_info(factory: &str) -> Option<FactoryInfo> {
    let info = match factory {
        "pipeline" | "bin" => FactoryInfo { container: true, ..FactoryInfo::element(CONTAINER_PROPS, false, false) },
        "autoaudiosrc" => FactoryInfo::element(AUTO_PROPS, false, true),
        "alsasrc" => FactoryInfo::element(ALSA_PROPS, false, true),
        "pulsesrc" => FactoryInfo::element(PULSE_PROPS, false, true),
        "jackaudiosrc" => FactoryInfo::element(JACK_PROPS, false, true),
        "pipewiresrc" => FactoryInfo::element(PIPEWIRE_PROPS, false, true),
        "audiotestsrc" => FactoryInfo::element(TEST_PROPS, false, true),
        "capsfilter" => FactoryInfo::element(CAPSFILTER_PROPS, true, true),
        "tee" => FactoryInfo { fan_out: true, ..FactoryInfo::element(TEE_PROPS, true, false) },
        "queue" => FactoryInfo::element(QUEUE_PROPS, true, true),
        "audioconvert" => FactoryInfo::element(CONVERT_PROPS, true, true),
        "audioresample" => FactoryInfo::element(RESAMPLE_PROPS, true, true),
        "vorbisenc" => FactoryInfo::element(VORBIS_PROPS, true, true).tagged(),
        "opusenc" => FactoryInfo::element(OPUS_PROPS, true, true).tagged(),
        "lamemp3enc" => FactoryInfo::element(MP3_PROPS, true, true).tagged(),
        "oggmux" => FactoryInfo::element(OGG_PROPS, true, true).tagged(),
        "webmmux" => FactoryInfo::element(WEBM_PROPS, true, true).tagged(),
        "shout2send" => FactoryInfo::element(SENDER_PROPS, true, false).tagged(),
        "level" => FactoryInfo::element(LEVEL_PROPS, true, true),
        _ => return None,
    };
    Some(info)
}

fn validate(kind: ValueKind, value: &str) -> Result<(), String> {
    let ok = match kind {
        Bool => matches!(value.to_ascii_lowercase().as_str(), "true" | "false" | "yes" | "no" | "1" | "0"),
        Int => value.trim().parse::<i64>().is_ok(),
        UInt => value.trim().parse::<u64>().is_ok(),
        Float => value.trim().parse::<f64>().is_ok(),
        Str => true,
        Enum(nicks) => nicks.contains(&value) || value.parse::<usize>().is_ok_and(|i| i < nicks.len()),
    };
    if ok { Ok(()) } else { Err(format!("cannot convert to {kind:?}")) }
}

#[derive(Debug)]
struct Node {
    name: String,
    factory: String,
    info: FactoryInfo,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    properties: BTreeMap<String, String>,
    state: NodeState,
    tag_merge_replace: bool,
    ports: Vec<PortId>,
    next_request: u32,
}

#[derive(Debug)]
struct Port {
    node: NodeId,
    direction: PortDirection,
    requested: bool,
    peer: Option<PortId>,
    /// Inner port when this is an exposed container port
    target: Option<PortId>,
}

/// Arena-backed [`MediaEngine`].
#[derive(Debug, Default)]
pub struct MemoryEngine {
    nodes: BTreeMap<NodeId, Node>,
    ports: BTreeMap<PortId, Port>,
    next_id: u64,
    missing_factories: HashSet<String>,
    unusable_factories: HashSet<String>,
    refused_links: HashSet<String>,
    fail_port_requests: bool,
    sent_tags: Vec<(String, NowPlaying)>,
    events: Option<mpsc::Sender<EngineEvent>>,
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `factory` is not installed.
    #[must_use]
    pub fn with_missing_factory(mut self, factory: &str) -> Self {
        self.missing_factories.insert(factory.to_string());
        self
    }

    /// Make nodes from `factory` fail to leave the null state.
    #[must_use]
    pub fn with_unusable_factory(mut self, factory: &str) -> Self {
        self.unusable_factories.insert(factory.to_string());
        self
    }

    /// Refuse to link the output of the node named `node`.
    #[must_use]
    pub fn with_refused_link(mut self, node: &str) -> Self {
        self.refused_links.insert(node.to_string());
        self
    }

    /// Make fan-out port requests fail until reset.
    pub fn set_port_requests_fail(&mut self, fail: bool) {
        self.fail_port_requests = fail;
    }

    /// Deliver an event to the subscriber, if any.
    pub fn post(&self, event: EngineEvent) -> bool {
        self.events.as_ref().is_some_and(|tx| tx.try_send(event).is_ok())
    }

    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|(_, n)| n.name == name).map(|(id, _)| *id)
    }

    #[must_use]
    pub fn property_of(&self, node: &str, property: &str) -> Option<String> {
        self.named(node).and_then(|n| n.properties.get(property).cloned())
    }

    #[must_use]
    pub fn parent_of(&self, node: &str) -> Option<String> {
        let parent = self.named(node)?.parent?;
        self.nodes.get(&parent).map(|p| p.name.clone())
    }

    #[must_use]
    pub fn state_of(&self, node: &str) -> Option<NodeState> {
        self.named(node).map(|n| n.state)
    }

    #[must_use]
    pub fn tag_merge_replace(&self, node: &str) -> bool {
        self.named(node).is_some_and(|n| n.tag_merge_replace)
    }

    /// Ports currently owned by `node`.
    #[must_use]
    pub fn ports_of(&self, node: NodeId) -> Vec<PortId> {
        self.nodes.get(&node).map(|n| n.ports.clone()).unwrap_or_default()
    }

    /// Number of requested ports currently held by `node`.
    #[must_use]
    pub fn requested_ports(&self, node: &str) -> usize {
        self.named(node).map_or(0, |n| n.ports.iter().filter(|p| self.ports[p].requested).count())
    }

    #[must_use]
    pub fn peer_of(&self, port: PortId) -> Option<PortId> {
        self.ports.get(&port).and_then(|p| p.peer)
    }

    /// Name of the node owning `port`.
    #[must_use]
    pub fn owner_of(&self, port: PortId) -> Option<String> {
        let port = self.ports.get(&port)?;
        self.nodes.get(&port.node).map(|n| n.name.clone())
    }

    /// Whether the static output of `from` feeds the static input of `to`.
    #[must_use]
    pub fn is_linked(&self, from: &str, to: &str) -> bool {
        let (Some(from), Some(to)) = (self.node_by_name(from), self.node_by_name(to)) else {
            return false;
        };
        self.nodes[&from].ports.iter().any(|p| {
            let port = &self.ports[p];
            port.direction == PortDirection::Output
                && port.peer.is_some_and(|peer| self.ports.get(&peer).is_some_and(|q| q.node == to))
        })
    }

    /// Tag events sent so far, with the name of the receiving node.
    #[must_use]
    pub fn sent_tags(&self) -> &[(String, NowPlaying)] {
        &self.sent_tags
    }

    fn named(&self, name: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.name == name)
    }

    fn node(&self, id: NodeId) -> EngineResult<&Node> {
        self.nodes.get(&id).ok_or_else(|| EngineError::NodeNotFound(id.to_string()))
    }

    fn node_mut(&mut self, id: NodeId) -> EngineResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or_else(|| EngineError::NodeNotFound(id.to_string()))
    }

    fn port(&self, id: PortId) -> EngineResult<&Port> {
        self.ports.get(&id).ok_or_else(|| EngineError::PortNotFound(id.to_string()))
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn add_port(&mut self, node: NodeId, direction: PortDirection, requested: bool, target: Option<PortId>) -> PortId {
        let id = PortId(self.next());
        self.ports.insert(id, Port { node, direction, requested, peer: None, target });
        if let Some(n) = self.nodes.get_mut(&node) {
            n.ports.push(id);
        }
        id
    }

    fn free_static_port(&self, node: NodeId, direction: PortDirection) -> EngineResult<PortId> {
        let n = self.node(node)?;
        n.ports
            .iter()
            .copied()
            .find(|p| {
                let port = &self.ports[p];
                port.direction == direction && !port.requested && port.peer.is_none()
            })
            .ok_or_else(|| EngineError::PortUnavailable(n.name.clone()))
    }

    fn spec(&self, node: NodeId, name: &str) -> EngineResult<(ValueKind, Access)> {
        let n = self.node(node)?;
        n.info
            .properties
            .iter()
            .find(|(p, _, _)| *p == name)
            .map(|(_, kind, access)| (*kind, *access))
            .ok_or_else(|| EngineError::UnknownProperty { node: n.name.clone(), property: name.to_string() })
    }

    fn propagate_state(&mut self, node: NodeId, state: NodeState) -> EngineResult<()> {
        let n = self.node(node)?;
        if state > NodeState::Null && self.unusable_factories.contains(&n.factory) {
            return Err(EngineError::StateChange { node: n.name.clone(), state });
        }
        let children = n.children.clone();
        for child in children {
            self.propagate_state(child, state)?;
        }
        self.node_mut(node)?.state = state;
        Ok(())
    }
}

impl MediaEngine for MemoryEngine {
    fn create_node(&mut self, factory: &str, name: &str) -> EngineResult<NodeId> {
        let info = factory_info(factory)
            .filter(|_| !self.missing_factories.contains(factory))
            .ok_or_else(|| EngineError::MissingFactory(factory.to_string()))?;

        let id = NodeId(self.next());
        self.nodes.insert(
            id,
            Node {
                name: name.to_string(),
                factory: factory.to_string(),
                info,
                parent: None,
                children: Vec::new(),
                properties: BTreeMap::new(),
                state: NodeState::Null,
                tag_merge_replace: false,
                ports: Vec::new(),
                next_request: 0,
            },
        );
        if info.input {
            self.add_port(id, PortDirection::Input, false, None);
        }
        if info.output {
            self.add_port(id, PortDirection::Output, false, None);
        }

        trace!(factory, name, %id, "Memory node created");
        Ok(id)
    }

    fn remove_node(&mut self, node: NodeId) -> EngineResult<()> {
        let n = self.nodes.remove(&node).ok_or_else(|| EngineError::NodeNotFound(node.to_string()))?;
        if let Some(parent) = n.parent
            && let Some(p) = self.nodes.get_mut(&parent)
        {
            p.children.retain(|c| *c != node);
        }

        for port in n.ports {
            if let Some(p) = self.ports.remove(&port)
                && let Some(peer) = p.peer
                && let Some(q) = self.ports.get_mut(&peer)
            {
                q.peer = None;
            }
        }

        for child in n.children {
            self.remove_node(child)?;
        }

        trace!(name = %n.name, %node, "Memory node removed");
        Ok(())
    }

    fn node_name(&self, node: NodeId) -> EngineResult<String> {
        Ok(self.node(node)?.name.clone())
    }

    fn properties(&self, node: NodeId) -> EngineResult<Vec<PropertySpec>> {
        Ok(self
            .node(node)?
            .info
            .properties
            .iter()
            .map(|(name, _, access)| PropertySpec {
                name: (*name).to_string(),
                writable: *access == ReadWrite,
                construct_only: false,
            })
            .collect())
    }

    fn set_property(&mut self, node: NodeId, name: &str, value: &str) -> EngineResult<()> {
        let (kind, access) = self.spec(node, name)?;
        let rejected = |n: &Node, reason: String| EngineError::PropertyRejected {
            node: n.name.clone(),
            property: name.to_string(),
            value: value.to_string(),
            reason,
        };

        let n = self.node(node)?;
        if access == ReadOnly {
            return Err(rejected(n, "property is not writable".to_string()));
        }
        validate(kind, value).map_err(|reason| rejected(n, reason))?;

        self.node_mut(node)?.properties.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn property(&self, node: NodeId, name: &str) -> EngineResult<Option<String>> {
        self.spec(node, name)?;
        Ok(self.node(node)?.properties.get(name).cloned())
    }

    fn add_child(&mut self, container: NodeId, child: NodeId) -> EngineResult<()> {
        let parent = self.node(container)?;
        if !parent.info.container {
            return Err(EngineError::NodeNotFound(format!("container {}", parent.name)));
        }
        let c = self.node(child)?;
        if let Some(existing) = c.parent {
            return Err(EngineError::AlreadyParented {
                child: c.name.clone(),
                parent: self.node(existing)?.name.clone(),
            });
        }

        self.node_mut(child)?.parent = Some(container);
        self.node_mut(container)?.children.push(child);
        Ok(())
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> EngineResult<()> {
        let (from_node, to_node) = (self.node(from)?, self.node(to)?);
        let refused = || EngineError::LinkFailed { from: from_node.name.clone(), to: to_node.name.clone() };

        if self.refused_links.contains(&from_node.name) || from_node.parent != to_node.parent {
            return Err(refused());
        }
        let output = self.free_static_port(from, PortDirection::Output).map_err(|_| refused())?;
        let input = self.free_static_port(to, PortDirection::Input).map_err(|_| refused())?;

        self.link_ports(output, input)
    }

    fn static_port(&mut self, node: NodeId, direction: PortDirection) -> EngineResult<PortId> {
        let n = self.node(node)?;
        n.ports
            .iter()
            .copied()
            .find(|p| {
                let port = &self.ports[p];
                port.direction == direction && !port.requested
            })
            .ok_or_else(|| EngineError::PortNotFound(format!("{} {direction:?}", n.name)))
    }

    fn expose_port(&mut self, container: NodeId, target: PortId) -> EngineResult<PortId> {
        let inner = self.port(target)?;
        let direction = inner.direction;
        let owner = self.node(inner.node)?;
        if owner.parent != Some(container) {
            return Err(EngineError::PortNotFound(format!("{target} in {container}")));
        }
        Ok(self.add_port(container, direction, false, Some(target)))
    }

    fn request_port(&mut self, node: NodeId) -> EngineResult<PortId> {
        let n = self.node(node)?;
        if !n.info.fan_out || self.fail_port_requests {
            return Err(EngineError::PortUnavailable(n.name.clone()));
        }

        let port = self.add_port(node, PortDirection::Output, true, None);
        let n = self.node_mut(node)?;
        debug!(node = %n.name, pad = %format!("src_{}", n.next_request), "Requested port");
        n.next_request += 1;
        Ok(port)
    }

    fn release_port(&mut self, node: NodeId, port: PortId) -> EngineResult<()> {
        let p = self.port(port)?;
        if p.node != node || !p.requested {
            return Err(EngineError::PortNotFound(port.to_string()));
        }
        let peer = p.peer;
        if let Some(peer) = peer {
            self.unlink_ports(port, peer)?;
        }

        self.ports.remove(&port);
        self.node_mut(node)?.ports.retain(|p| *p != port);
        Ok(())
    }

    fn link_ports(&mut self, output: PortId, input: PortId) -> EngineResult<()> {
        let (out, inp) = (self.port(output)?, self.port(input)?);
        let (out_node, in_node) = (self.node(out.node)?, self.node(inp.node)?);
        let valid = out.direction == PortDirection::Output
            && inp.direction == PortDirection::Input
            && out.peer.is_none()
            && inp.peer.is_none()
            && out_node.parent == in_node.parent;
        if !valid {
            return Err(EngineError::LinkFailed { from: out_node.name.clone(), to: in_node.name.clone() });
        }

        if let Some(p) = self.ports.get_mut(&output) {
            p.peer = Some(input);
        }
        if let Some(p) = self.ports.get_mut(&input) {
            p.peer = Some(output);
        }
        Ok(())
    }

    fn unlink_ports(&mut self, output: PortId, input: PortId) -> EngineResult<()> {
        if self.port(output)?.peer != Some(input) {
            return Err(EngineError::LinkFailed { from: output.to_string(), to: input.to_string() });
        }
        for id in [output, input] {
            if let Some(p) = self.ports.get_mut(&id) {
                p.peer = None;
            }
        }
        Ok(())
    }

    fn set_state(&mut self, node: NodeId, state: NodeState) -> EngineResult<()> {
        self.propagate_state(node, state)
    }

    fn set_tag_merge_replace(&mut self, node: NodeId) -> EngineResult<()> {
        let n = self.node_mut(node)?;
        if !n.info.tag_setter {
            return Err(EngineError::NotTagSetter(n.name.clone()));
        }
        n.tag_merge_replace = true;
        Ok(())
    }

    fn send_tags(&mut self, node: NodeId, tags: &NowPlaying) -> EngineResult<()> {
        let name = self.node(node)?.name.clone();
        self.sent_tags.push((name, tags.clone()));
        Ok(())
    }

    fn subscribe(&mut self, pipeline: NodeId) -> EngineResult<mpsc::Receiver<EngineEvent>> {
        self.node(pipeline)?;
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        self.events = Some(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_property_values_are_validated() {
        let mut engine = MemoryEngine::new();
        let sender = engine.create_node("shout2send", "shout2send-a").expect("created");

        engine.set_property(sender, "port", "8000").expect("integer accepted");
        engine.set_property(sender, "protocol", "icy").expect("nick accepted");
        engine.set_property(sender, "protocol", "2").expect("index accepted");
        assert_matches!(engine.set_property(sender, "port", "x"), Err(EngineError::PropertyRejected { .. }));
        assert_matches!(engine.set_property(sender, "protocol", "ftp"), Err(EngineError::PropertyRejected { .. }));
        assert_matches!(engine.set_property(sender, "bogus", "1"), Err(EngineError::UnknownProperty { .. }));
    }

    #[test]
    fn test_read_only_property_is_rejected() {
        let mut engine = MemoryEngine::new();
        let queue = engine.create_node("queue", "q").expect("created");
        let spec = engine
            .properties(queue)
            .expect("properties")
            .into_iter()
            .find(|s| s.name == "current-level-buffers")
            .expect("listed");
        assert!(!spec.settable());
        assert_matches!(
            engine.set_property(queue, "current-level-buffers", "1"),
            Err(EngineError::PropertyRejected { .. })
        );
    }

    #[test]
    fn test_links_require_a_common_parent() {
        let mut engine = MemoryEngine::new();
        let bin = engine.create_node("bin", "b").expect("created");
        let queue = engine.create_node("queue", "q").expect("created");
        let convert = engine.create_node("audioconvert", "c").expect("created");

        engine.add_child(bin, queue).expect("added");
        assert_matches!(engine.link(queue, convert), Err(EngineError::LinkFailed { .. }));

        engine.add_child(bin, convert).expect("added");
        engine.link(queue, convert).expect("linked");
        assert!(engine.is_linked("q", "c"));
    }

    #[test]
    fn test_request_and_release_ports() {
        let mut engine = MemoryEngine::new();
        let tee = engine.create_node("tee", "t").expect("created");
        let queue = engine.create_node("queue", "q").expect("created");

        let port = engine.request_port(tee).expect("requested");
        let input = engine.static_port(queue, PortDirection::Input).expect("static");
        engine.link_ports(port, input).expect("linked");
        assert_eq!(engine.requested_ports("t"), 1);

        engine.release_port(tee, port).expect("released");
        assert_eq!(engine.requested_ports("t"), 0);
        assert_eq!(engine.peer_of(input), None);
    }

    #[test]
    fn test_removing_a_container_removes_its_children() {
        let mut engine = MemoryEngine::new();
        let bin = engine.create_node("bin", "bin-radio1").expect("created");
        let queue = engine.create_node("queue", "queue-radio1").expect("created");
        let convert = engine.create_node("audioconvert", "audioconvert-radio1").expect("created");
        engine.add_child(bin, queue).expect("added");
        engine.add_child(bin, convert).expect("added");
        engine.link(queue, convert).expect("linked");

        engine.remove_node(convert).expect("removed");
        assert!(engine.node_by_name("audioconvert-radio1").is_none());
        let output = engine.static_port(queue, PortDirection::Output).expect("port");
        assert_eq!(engine.peer_of(output), None);

        engine.remove_node(bin).expect("removed");
        assert!(engine.node_by_name("bin-radio1").is_none());
        assert!(engine.node_by_name("queue-radio1").is_none());
        assert_matches!(engine.remove_node(queue), Err(EngineError::NodeNotFound(_)));
    }

    #[test]
    fn test_container_state_propagates() {
        let mut engine = MemoryEngine::new();
        let bin = engine.create_node("bin", "b").expect("created");
        let queue = engine.create_node("queue", "q").expect("created");
        engine.add_child(bin, queue).expect("added");

        engine.set_state(bin, NodeState::Playing).expect("playing");
        assert_eq!(engine.state_of("q"), Some(NodeState::Playing));
    }

    #[test]
    fn test_missing_factory() {
        let mut engine = MemoryEngine::new().with_missing_factory("lamemp3enc");
        assert_matches!(engine.create_node("lamemp3enc", "x"), Err(EngineError::MissingFactory(_)));
        assert_matches!(engine.create_node("faac", "y"), Err(EngineError::MissingFactory(_)));
    }
}
