//! IceStreamer Engine - graph assembly and fault-tolerant stream management.
//!
//! This crate builds the capture-to-broadcast graph on top of a
//! [`MediaEngine`]:
//! - Creating nodes and applying configuration properties
//! - Assembling the source and one branch per destination
//! - Attaching and detaching branches on the fan-out
//! - Executing supervisor decisions against the running graph

pub mod branch;
pub mod engine;
pub mod error;
pub mod factory;
pub mod graph;
pub mod memory;
pub mod runtime;
pub mod source;

pub use branch::Branch;
pub use engine::{EngineEvent, MediaEngine, NodeId, NodeState, PortDirection, PortId, PropertySpec, RawFault};
pub use error::{EngineError, EngineResult, GraphError, GraphResult};
pub use factory::NodeFactory;
pub use graph::{LoadOptions, MediaGraph};
pub use memory::MemoryEngine;
pub use runtime::{LoopAction, Streamer};
pub use source::Source;
