//! Source assembly.
//!
//! Builds the capture node, checks that the backend is usable, and wraps it
//! (with an optional constraint filter) into a container exposing a single
//! output port.

use tracing::{debug, info};

use icestreamer_core::{Constraint, NodeKind, SourceKind, StreamerConfig, INPUT_GROUP};

use crate::engine::{MediaEngine, NodeId, NodeState, PortDirection, PortId};
use crate::error::{GraphError, GraphResult};
use crate::factory::NodeFactory;

/// Name of the source container.
pub const SOURCE_CONTAINER: &str = "source_bin";

/// The assembled capture sub-graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    /// Container holding the capture chain
    pub container: NodeId,
    pub capture: NodeId,
    pub constraint: Option<NodeId>,
    /// The container's only output port
    pub output: PortId,
}

/// Build the capture sub-graph described by the `input` group.
///
/// # Errors
/// Returns an error if the backend selector is missing or unknown, a property
/// is rejected, the backend cannot be brought to the ready state, or the
/// nodes cannot be linked.
pub fn build_source<E: MediaEngine>(
    factory: &mut NodeFactory<'_, E>,
    config: &StreamerConfig,
) -> GraphResult<Source> {
    let kind = config.source_kind()?;
    let constraint = config.constraint()?;
    let input = config.input();

    debug!(source = ?kind, factory = kind.factory(), "Constructing source");
    let capture = factory.create_for_group(NodeKind::Capture(kind), INPUT_GROUP)?;
    factory.apply(capture, &input)?;

    if kind == SourceKind::Test {
        factory.set(capture, "is-live", "true")?;
    }

    check_usable(factory.engine(), capture)?;

    let container = factory.create(NodeKind::Container, SOURCE_CONTAINER)?;
    factory.engine().add_child(container, capture)?;

    let (tail, constraint_node) = if constraint.is_empty() {
        (capture, None)
    } else {
        let filter = factory.create_for_group(NodeKind::Constraint, INPUT_GROUP)?;
        factory.set(filter, "caps", &caps_string(&constraint))?;
        factory.engine().add_child(container, filter)?;
        factory.engine().link(capture, filter).map_err(|source| GraphError::Link {
            what: "source to constraint filter".to_string(),
            source,
        })?;
        (filter, Some(filter))
    };

    let engine = factory.engine();
    let target = engine.static_port(tail, PortDirection::Output)?;
    let output = engine.expose_port(container, target)?;

    info!(source = kind.factory(), constrained = constraint_node.is_some(), "Source ready");
    Ok(Source { container, capture, constraint: constraint_node, output })
}

/// Bring the node to ready and back, failing fast if the backend is unusable.
fn check_usable<E: MediaEngine>(engine: &mut E, node: NodeId) -> GraphResult<()> {
    engine.set_state(node, NodeState::Ready)?;
    engine.set_state(node, NodeState::Null)?;
    Ok(())
}

/// Raw-audio caps restricted by the configured constraint.
#[must_use]
pub fn caps_string(constraint: &Constraint) -> String {
    let mut caps = String::from("audio/x-raw");
    if let Some(format) = &constraint.format {
        caps.push_str(&format!(",format=(string){format}"));
    }
    if let Some(channels) = constraint.channels {
        caps.push_str(&format!(",channels=(int){channels}"));
        if let Some(mask) = fallback_channel_mask(channels) {
            caps.push_str(&format!(",channel-mask=(bitmask)0x{mask:x}"));
        }
    }
    if let Some(rate) = constraint.rate {
        caps.push_str(&format!(",rate=(int){rate}"));
    }
    caps
}

/// Default speaker layout for multichannel audio.
///
/// Mono and layouts beyond 7.1 have no fallback.
#[must_use]
pub fn fallback_channel_mask(channels: u32) -> Option<u64> {
    const FRONT_LEFT: u64 = 1 << 0;
    const FRONT_RIGHT: u64 = 1 << 1;
    const FRONT_CENTER: u64 = 1 << 2;
    const LFE: u64 = 1 << 3;
    const REAR_LEFT: u64 = 1 << 4;
    const REAR_RIGHT: u64 = 1 << 5;
    const REAR_CENTER: u64 = 1 << 8;
    const SIDE_LEFT: u64 = 1 << 10;
    const SIDE_RIGHT: u64 = 1 << 11;

    let stereo = FRONT_LEFT | FRONT_RIGHT;
    let mask = match channels {
        2 => stereo,
        3 => stereo | LFE,
        4 => stereo | REAR_LEFT | REAR_RIGHT,
        5 => stereo | FRONT_CENTER | REAR_LEFT | REAR_RIGHT,
        6 => stereo | FRONT_CENTER | LFE | REAR_LEFT | REAR_RIGHT,
        7 => stereo | FRONT_CENTER | LFE | REAR_LEFT | REAR_RIGHT | REAR_CENTER,
        8 => stereo | FRONT_CENTER | LFE | REAR_LEFT | REAR_RIGHT | SIDE_LEFT | SIDE_RIGHT,
        _ => return None,
    };
    Some(mask)
}
