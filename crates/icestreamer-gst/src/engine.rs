//! GStreamer-backed media engine.

use std::collections::HashMap;

use gstreamer as gst;
use gstreamer::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info};

use icestreamer_core::NowPlaying;
use icestreamer_engine::{
    EngineError, EngineEvent, EngineResult, MediaEngine, NodeId, NodeState, PortDirection, PortId, PropertySpec,
};

use crate::bus::BusMonitor;

/// Capacity of the bus event channel.
const EVENT_CAPACITY: usize = 64;
/// Template of the fan-out's request pads.
const FAN_OUT_TEMPLATE: &str = "src_%u";

/// [`MediaEngine`] driving real GStreamer elements.
///
/// Elements and pads are kept in id-addressed tables; GStreamer itself owns
/// the parent/child relations.
#[derive(Debug)]
pub struct GstEngine {
    elements: HashMap<NodeId, gst::Element>,
    pads: HashMap<PortId, gst::Pad>,
    next_id: u64,
    monitor: Option<BusMonitor>,
}

impl GstEngine {
    /// Initialise GStreamer.
    ///
    /// # Errors
    /// Returns an error if GStreamer cannot be initialised.
    pub fn new() -> EngineResult<Self> {
        gst::init().map_err(|e| EngineError::Bus(e.to_string()))?;
        info!(version = %gst::version_string(), "GStreamer initialised");
        Ok(Self { elements: HashMap::new(), pads: HashMap::new(), next_id: 0, monitor: None })
    }

    fn element(&self, node: NodeId) -> EngineResult<&gst::Element> {
        self.elements.get(&node).ok_or_else(|| EngineError::NodeNotFound(node.to_string()))
    }

    fn pad(&self, port: PortId) -> EngineResult<&gst::Pad> {
        self.pads.get(&port).ok_or_else(|| EngineError::PortNotFound(port.to_string()))
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Register `pad`, reusing its id if it is already known.
    fn register_pad(&mut self, pad: gst::Pad) -> PortId {
        if let Some((id, _)) = self.pads.iter().find(|(_, p)| **p == pad) {
            return *id;
        }
        let id = PortId(self.next());
        self.pads.insert(id, pad);
        id
    }

    fn bin(&self, node: NodeId) -> EngineResult<gst::Bin> {
        let element = self.element(node)?;
        element
            .clone()
            .downcast::<gst::Bin>()
            .map_err(|_| EngineError::NodeNotFound(format!("container {}", element.name())))
    }
}

fn gst_state(state: NodeState) -> gst::State {
    match state {
        NodeState::Null => gst::State::Null,
        NodeState::Ready => gst::State::Ready,
        NodeState::Paused => gst::State::Paused,
        NodeState::Playing => gst::State::Playing,
    }
}

impl MediaEngine for GstEngine {
    fn create_node(&mut self, factory: &str, name: &str) -> EngineResult<NodeId> {
        let element = gst::ElementFactory::make(factory)
            .name(name)
            .build()
            .map_err(|_| EngineError::MissingFactory(factory.to_string()))?;

        let id = NodeId(self.next());
        self.elements.insert(id, element);
        Ok(id)
    }

    fn remove_node(&mut self, node: NodeId) -> EngineResult<()> {
        let element = self.elements.remove(&node).ok_or_else(|| EngineError::NodeNotFound(node.to_string()))?;
        if let Some(parent) = element.parent().and_then(|p| p.downcast::<gst::Bin>().ok()) {
            parent.remove(&element).map_err(|_| {
                EngineError::NodeNotFound(format!("{} in {}", element.name(), parent.name()))
            })?;
        }
        if element.set_state(gst::State::Null).is_err() {
            debug!(node = %element.name(), "Removed element refused the null state");
        }

        self.elements.retain(|_, e| !e.has_as_ancestor(&element));
        self.pads.retain(|_, p| {
            p.parent_element().is_some_and(|owner| owner != element && !owner.has_as_ancestor(&element))
        });
        Ok(())
    }

    fn node_name(&self, node: NodeId) -> EngineResult<String> {
        Ok(self.element(node)?.name().to_string())
    }

    fn properties(&self, node: NodeId) -> EngineResult<Vec<PropertySpec>> {
        Ok(self
            .element(node)?
            .list_properties()
            .iter()
            .map(|pspec| PropertySpec {
                name: pspec.name().to_string(),
                writable: pspec.flags().contains(glib::ParamFlags::WRITABLE),
                construct_only: pspec.flags().contains(glib::ParamFlags::CONSTRUCT_ONLY),
            })
            .collect())
    }

    fn set_property(&mut self, node: NodeId, name: &str, value: &str) -> EngineResult<()> {
        let element = self.element(node)?;
        let rejected = |reason: &str| EngineError::PropertyRejected {
            node: element.name().to_string(),
            property: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let pspec = element.find_property(name).ok_or_else(|| EngineError::UnknownProperty {
            node: element.name().to_string(),
            property: name.to_string(),
        })?;
        if !pspec.flags().contains(glib::ParamFlags::WRITABLE) {
            return Err(rejected("property is not writable"));
        }

        let parsed = glib::Value::deserialize(value, pspec.value_type())
            .map_err(|_| rejected(&format!("cannot convert to {}", pspec.value_type())))?;
        if !pspec.value_is_valid(&parsed) {
            return Err(rejected("value out of range"));
        }

        element.set_property_from_value(name, &parsed);
        Ok(())
    }

    fn property(&self, node: NodeId, name: &str) -> EngineResult<Option<String>> {
        let element = self.element(node)?;
        if element.find_property(name).is_none() {
            return Err(EngineError::UnknownProperty { node: element.name().to_string(), property: name.to_string() });
        }

        let value = element.property_value(name);
        if let Ok(text) = value.get::<Option<String>>() {
            return Ok(text);
        }
        Ok(value.serialize().ok().map(|s| s.to_string()))
    }

    fn add_child(&mut self, container: NodeId, child: NodeId) -> EngineResult<()> {
        let bin = self.bin(container)?;
        let element = self.element(child)?;
        bin.add(element).map_err(|_| EngineError::AlreadyParented {
            child: element.name().to_string(),
            parent: element.parent().map_or_else(|| bin.name().to_string(), |p| p.name().to_string()),
        })
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> EngineResult<()> {
        let (src, sink) = (self.element(from)?, self.element(to)?);
        src.link(sink).map_err(|_| EngineError::LinkFailed { from: src.name().to_string(), to: sink.name().to_string() })
    }

    fn static_port(&mut self, node: NodeId, direction: PortDirection) -> EngineResult<PortId> {
        let element = self.element(node)?;
        let name = match direction {
            PortDirection::Input => "sink",
            PortDirection::Output => "src",
        };
        let pad = element
            .static_pad(name)
            .ok_or_else(|| EngineError::PortNotFound(format!("{}:{name}", element.name())))?;
        Ok(self.register_pad(pad))
    }

    fn expose_port(&mut self, container: NodeId, target: PortId) -> EngineResult<PortId> {
        let bin = self.bin(container)?;
        let target = self.pad(target)?;
        let ghost = gst::GhostPad::with_target(target)
            .map_err(|_| EngineError::PortNotFound(format!("{}:{}", bin.name(), target.name())))?;
        ghost.set_active(true).map_err(|e| EngineError::PortUnavailable(e.to_string()))?;
        bin.add_pad(&ghost).map_err(|_| EngineError::PortUnavailable(bin.name().to_string()))?;
        Ok(self.register_pad(ghost.upcast()))
    }

    fn request_port(&mut self, node: NodeId) -> EngineResult<PortId> {
        let element = self.element(node)?;
        let pad = element
            .request_pad_simple(FAN_OUT_TEMPLATE)
            .ok_or_else(|| EngineError::PortUnavailable(element.name().to_string()))?;
        debug!(node = %element.name(), pad = %pad.name(), "Requested pad");
        Ok(self.register_pad(pad))
    }

    fn release_port(&mut self, node: NodeId, port: PortId) -> EngineResult<()> {
        let element = self.element(node)?.clone();
        let pad = self.pads.remove(&port).ok_or_else(|| EngineError::PortNotFound(port.to_string()))?;
        element.release_request_pad(&pad);
        Ok(())
    }

    fn link_ports(&mut self, output: PortId, input: PortId) -> EngineResult<()> {
        let (src, sink) = (self.pad(output)?, self.pad(input)?);
        src.link(sink).map(|_| ()).map_err(|e| EngineError::LinkFailed {
            from: src.name().to_string(),
            to: format!("{} ({e:?})", sink.name()),
        })
    }

    fn unlink_ports(&mut self, output: PortId, input: PortId) -> EngineResult<()> {
        let (src, sink) = (self.pad(output)?, self.pad(input)?);
        src.unlink(sink)
            .map_err(|_| EngineError::LinkFailed { from: src.name().to_string(), to: sink.name().to_string() })
    }

    fn set_state(&mut self, node: NodeId, state: NodeState) -> EngineResult<()> {
        let element = self.element(node)?;
        element
            .set_state(gst_state(state))
            .map(|_| ())
            .map_err(|_| EngineError::StateChange { node: element.name().to_string(), state })
    }

    fn set_tag_merge_replace(&mut self, node: NodeId) -> EngineResult<()> {
        let element = self.element(node)?;
        let setter = element
            .dynamic_cast_ref::<gst::TagSetter>()
            .ok_or_else(|| EngineError::NotTagSetter(element.name().to_string()))?;
        setter.set_tag_merge_mode(gst::TagMergeMode::Replace);
        Ok(())
    }

    fn send_tags(&mut self, node: NodeId, tags: &NowPlaying) -> EngineResult<()> {
        let element = self.element(node)?;

        let mut list = gst::TagList::new();
        {
            let list = list.make_mut();
            list.add::<gst::tags::Artist>(&tags.artist.as_str(), gst::TagMergeMode::Replace);
            list.add::<gst::tags::Title>(&tags.title.as_str(), gst::TagMergeMode::Replace);
            list.set_scope(gst::TagScope::Global);
        }

        if element.send_event(gst::event::Tag::new(list)) {
            Ok(())
        } else {
            Err(EngineError::EventRejected(element.name().to_string()))
        }
    }

    fn subscribe(&mut self, pipeline: NodeId) -> EngineResult<mpsc::Receiver<EngineEvent>> {
        let element = self.element(pipeline)?;
        let bus = element.bus().ok_or_else(|| EngineError::Bus(format!("{} has no bus", element.name())))?;

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let monitor = BusMonitor::spawn(bus, tx).map_err(|e| EngineError::Bus(e.to_string()))?;
        self.monitor = Some(monitor);
        Ok(rx)
    }
}
