//! Branch assembly.
//!
//! A branch is one destination: queue → convert → resample → encoder →
//! [muxer] → sender, wrapped in a container exposing the queue's input.
//! Its nodes live as long as the graph; only the container's link to the
//! fan-out and its running state change.

use tracing::{debug, warn};

use icestreamer_core::{ContainerKind, Group, NodeKind};

use crate::engine::{MediaEngine, NodeId, PortDirection, PortId};
use crate::error::{GraphError, GraphResult};
use crate::factory::NodeFactory;

/// One assembled destination branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// Group name, also the advertised stream name
    name: String,
    container: NodeId,
    sender: NodeId,
    /// The container's only input port
    input: PortId,
    /// Names of every node inside the container
    node_names: Vec<String>,
}

impl Branch {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn container(&self) -> NodeId {
        self.container
    }

    #[must_use]
    pub fn sender(&self) -> NodeId {
        self.sender
    }

    #[must_use]
    pub fn input(&self) -> PortId {
        self.input
    }

    /// Names of the container and every node it owns.
    #[must_use]
    pub fn node_names(&self) -> &[String] {
        &self.node_names
    }
}

/// Build the branch for destination `group`.
///
/// Nodes created before a failure are removed again.
///
/// # Errors
/// Returns an error if the encoder or container selection is invalid, a node
/// cannot be created, a property is rejected, or the chain cannot be linked.
pub fn build_branch<E: MediaEngine>(factory: &mut NodeFactory<'_, E>, group: &Group) -> GraphResult<Branch> {
    let mut created = Vec::new();
    let result = assemble(factory, group, &mut created);
    if result.is_err() {
        discard(factory.engine(), group.name(), &created);
    }
    result
}

/// Remove partially built nodes, innermost first.
fn discard<E: MediaEngine>(engine: &mut E, name: &str, created: &[NodeId]) {
    for &node in created.iter().rev() {
        // Gone already if its container was removed first.
        if engine.node_name(node).is_err() {
            continue;
        }
        if let Err(e) = engine.remove_node(node) {
            warn!(stream = name, %node, error = %e, "Failed to remove node");
        }
    }
}

fn create<E: MediaEngine>(
    factory: &mut NodeFactory<'_, E>,
    created: &mut Vec<NodeId>,
    kind: NodeKind,
    group: &str,
) -> GraphResult<NodeId> {
    let node = factory.create_for_group(kind, group)?;
    created.push(node);
    Ok(node)
}

fn assemble<E: MediaEngine>(
    factory: &mut NodeFactory<'_, E>,
    group: &Group,
    created: &mut Vec<NodeId>,
) -> GraphResult<Branch> {
    let name = group.name();
    let (encoder_kind, container_kind) = group.encoding()?;

    debug!(stream = name, encoder = encoder_kind.factory(), "Constructing encoder");
    let encoder = create(factory, created, NodeKind::Encoder(encoder_kind), name)?;
    factory.apply(encoder, group)?;

    let muxer = match container_kind {
        Some(kind) => {
            debug!(stream = name, muxer = kind.factory(), "Constructing muxer");
            let muxer = create(factory, created, NodeKind::Muxer(kind), name)?;
            if kind == ContainerKind::WebM {
                factory.set(muxer, "streamable", "true")?;
            }
            Some(muxer)
        }
        None => None,
    };

    let sender = create(factory, created, NodeKind::Sender, name)?;
    factory.set(sender, "streamname", name)?;
    factory.apply(sender, group)?;

    let container = create(factory, created, NodeKind::Container, name)?;
    let queue = create(factory, created, NodeKind::Queue, name)?;
    let convert = create(factory, created, NodeKind::Convert, name)?;
    let resample = create(factory, created, NodeKind::Resample, name)?;

    factory.set(container, "async-handling", "true")?;
    factory.set(queue, "leaky", "downstream")?;

    let chain: Vec<NodeId> = [Some(queue), Some(convert), Some(resample), Some(encoder), muxer, Some(sender)]
        .into_iter()
        .flatten()
        .collect();

    let engine = factory.engine();
    let mut node_names = vec![engine.node_name(container)?];
    for &node in &chain {
        engine.add_child(container, node)?;
        node_names.push(engine.node_name(node)?);
    }

    for pair in chain.windows(2) {
        engine.link(pair[0], pair[1]).map_err(|source| GraphError::Link {
            what: format!("pipeline for stream '{name}'"),
            source,
        })?;
    }

    let target = engine.static_port(queue, PortDirection::Input)?;
    let input = engine.expose_port(container, target)?;
    engine.set_tag_merge_replace(sender)?;

    Ok(Branch { name: name.to_string(), container, sender, input, node_names })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::memory::MemoryEngine;

    #[test]
    fn test_vorbis_branch_layout() {
        let mut engine = MemoryEngine::new();
        let group = Group::new("radio1")
            .with("encoder", "vorbis")
            .with("container", "webm")
            .with("ip", "icecast.example.org")
            .with("port", "8000")
            .with("quality", "0.6");

        let branch = build_branch(&mut NodeFactory::new(&mut engine), &group).expect("branch built");

        assert_eq!(
            branch.node_names(),
            [
                "bin-radio1",
                "queue-radio1",
                "audioconvert-radio1",
                "audioresample-radio1",
                "vorbisenc-radio1",
                "webmmux-radio1",
                "shout2send-radio1",
            ]
        );
        assert!(engine.is_linked("queue-radio1", "audioconvert-radio1"));
        assert!(engine.is_linked("vorbisenc-radio1", "webmmux-radio1"));
        assert!(engine.is_linked("webmmux-radio1", "shout2send-radio1"));

        assert_eq!(engine.property_of("shout2send-radio1", "streamname").as_deref(), Some("radio1"));
        assert_eq!(engine.property_of("shout2send-radio1", "ip").as_deref(), Some("icecast.example.org"));
        assert_eq!(engine.property_of("vorbisenc-radio1", "quality").as_deref(), Some("0.6"));
        assert_eq!(engine.property_of("webmmux-radio1", "streamable").as_deref(), Some("true"));
        assert_eq!(engine.property_of("queue-radio1", "leaky").as_deref(), Some("downstream"));
        assert_eq!(engine.property_of("bin-radio1", "async-handling").as_deref(), Some("true"));
        assert!(engine.tag_merge_replace("shout2send-radio1"));
        assert_eq!(engine.parent_of("shout2send-radio1").as_deref(), Some("bin-radio1"));
    }

    #[test]
    fn test_mp3_branch_has_no_muxer() {
        let mut engine = MemoryEngine::new();
        let group = Group::new("radio2").with("encoder", "mp3").with("container", "ogg");

        let branch = build_branch(&mut NodeFactory::new(&mut engine), &group).expect("branch built");

        assert!(!branch.node_names().iter().any(|n| n.contains("mux")));
        assert!(engine.is_linked("lamemp3enc-radio2", "shout2send-radio2"));
    }

    #[test]
    fn test_sender_config_overrides_stream_name() {
        let mut engine = MemoryEngine::new();
        let group = Group::new("radio1").with("encoder", "mp3").with("streamname", "Radio One");

        build_branch(&mut NodeFactory::new(&mut engine), &group).expect("branch built");
        assert_eq!(engine.property_of("shout2send-radio1", "streamname").as_deref(), Some("Radio One"));
    }

    #[test]
    fn test_rejected_sender_property_fails_branch() {
        let mut engine = MemoryEngine::new();
        let group = Group::new("radio1").with("encoder", "mp3").with("port", "eighty");

        let result = build_branch(&mut NodeFactory::new(&mut engine), &group);
        assert_matches!(result, Err(GraphError::Config(_)));
        assert!(engine.node_by_name("lamemp3enc-radio1").is_none());
        assert!(engine.node_by_name("shout2send-radio1").is_none());
    }

    #[test]
    fn test_link_failure_fails_branch() {
        let mut engine = MemoryEngine::new().with_refused_link("opusenc-radio1");
        let group = Group::new("radio1").with("encoder", "opus").with("container", "ogg");

        let result = build_branch(&mut NodeFactory::new(&mut engine), &group);
        assert_matches!(result, Err(GraphError::Link { .. }));
        for node in ["bin-radio1", "queue-radio1", "opusenc-radio1", "oggmux-radio1", "shout2send-radio1"] {
            assert!(engine.node_by_name(node).is_none(), "{node} left behind");
        }
    }

    #[test]
    fn test_rebuild_after_failure_reuses_names() {
        let mut engine = MemoryEngine::new();
        let broken = Group::new("radio1").with("encoder", "mp3").with("port", "eighty");
        assert!(build_branch(&mut NodeFactory::new(&mut engine), &broken).is_err());

        let fixed = Group::new("radio1").with("encoder", "mp3").with("port", "8000");
        build_branch(&mut NodeFactory::new(&mut engine), &fixed).expect("branch built");
        assert_eq!(engine.property_of("shout2send-radio1", "port").as_deref(), Some("8000"));
    }
}
