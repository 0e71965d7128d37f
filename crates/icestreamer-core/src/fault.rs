//! Run-time fault classification.

use serde::{Deserialize, Serialize};

use crate::kind::SENDER_FACTORY;

/// Severity reported by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Error domain reported by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultDomain {
    /// Engine core failure
    Core,
    /// Supporting library failure
    Library,
    /// Resource or transport failure (network, device, file)
    Resource,
    /// Data stream failure (format, decode)
    Stream,
    /// Anything else
    Other,
}

/// A fault observed on the engine's message stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub severity: Severity,
    pub domain: FaultDomain,
    /// Name of the node that posted the fault
    pub source: Option<String>,
    /// Branch owning the source node, if any
    pub branch: Option<String>,
    pub message: String,
    pub debug: Option<String>,
}

/// What a fault means for the streamer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultClass {
    /// Logged, no state change
    Warning,
    /// A branch lost its network connection and must be detached
    Network { branch: String },
    /// Anything else at error level terminates the process
    Fatal,
}

impl Fault {
    /// Whether the fault was posted by a network sender node.
    #[must_use]
    pub fn from_sender(&self) -> bool {
        self.source.as_deref().is_some_and(|s| s.starts_with(SENDER_FACTORY))
    }

    /// Classify the fault.
    ///
    /// Only resource faults posted by a network sender inside a known branch
    /// are recoverable. A sender fault whose branch could not be resolved is
    /// fatal.
    #[must_use]
    pub fn classify(&self) -> FaultClass {
        match self.severity {
            Severity::Warning => FaultClass::Warning,
            Severity::Error => match (&self.branch, self.domain) {
                (Some(branch), FaultDomain::Resource) if self.from_sender() => {
                    FaultClass::Network { branch: branch.clone() }
                }
                _ => FaultClass::Fatal,
            },
        }
    }
}
