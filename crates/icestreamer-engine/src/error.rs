//! Engine and graph error types.

use thiserror::Error;

use crate::engine::NodeState;

/// Failure reported by the media engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No such node factory: {0}")]
    MissingFactory(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Unknown property '{property}' on {node}")]
    UnknownProperty { node: String, property: String },

    #[error("{node} rejected {property}={value}: {reason}")]
    PropertyRejected { node: String, property: String, value: String, reason: String },

    #[error("{child} already belongs to {parent}")]
    AlreadyParented { child: String, parent: String },

    #[error("Cannot link {from} to {to}")]
    LinkFailed { from: String, to: String },

    #[error("No port available on {0}")]
    PortUnavailable(String),

    #[error("{node} failed to change state to {state:?}")]
    StateChange { node: String, state: NodeState },

    #[error("{0} does not support tags")]
    NotTagSetter(String),

    #[error("Event rejected by {0}")]
    EventRejected(String),

    #[error("Message bus error: {0}")]
    Bus(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure while assembling or driving the media graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Configuration error: {0}")]
    Config(#[from] icestreamer_core::Error),

    #[error("Could not create {factory}: {source}")]
    Factory {
        factory: String,
        #[source]
        source: EngineError,
    },

    #[error("Failed to link {what}: {source}")]
    Link {
        what: String,
        #[source]
        source: EngineError,
    },

    #[error("Unknown branch: {0}")]
    UnknownBranch(String),

    #[error("Branch {0} is not attached")]
    NotAttached(String),

    #[error("Branch {0} is already attached")]
    AlreadyAttached(String),

    #[error("Failed to load graph: {0}")]
    Load(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;
