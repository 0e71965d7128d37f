//! IceStreamer Core - configuration model, fault supervision and metadata state.
//!
//! This crate holds everything that does not touch the media engine: the
//! configuration groups, node kinds, fault classification, the reconnect
//! supervisor and the now-playing parser.

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod fault;
pub mod kind;
pub mod metadata;
pub mod status;
pub mod supervisor;

pub use command::Action;
pub use config::{Constraint, Group, StreamerConfig, INPUT_GROUP, METADATA_GROUP};
pub use error::{Error, MalformedMetadata, MetadataError, Result};
pub use event::{LoopEvent, MetadataNotification, ShutdownReason, WatchKind};
pub use fault::{Fault, FaultClass, FaultDomain, Severity};
pub use kind::{ContainerKind, EncoderKind, NodeKind, SourceKind, SENDER_FACTORY};
pub use metadata::{MetadataState, NowPlaying};
pub use status::{BranchInfo, BranchState, BranchStatus, StatusUpdate, UiRequest};
pub use supervisor::{Supervisor, RECONNECT_DELAY};
