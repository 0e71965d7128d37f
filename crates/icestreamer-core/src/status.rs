//! Snapshots pushed to the status display.
//!
//! The display never touches the graph. It only receives these values over a
//! channel and can send back a [`UiRequest`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Running state of one destination branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchState {
    /// Attached to the fan-out and streaming
    Active,
    /// Waiting for the reconnect timer
    Detached,
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Detached => write!(f, "detached"),
        }
    }
}

/// Name and state of one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStatus {
    pub name: String,
    pub state: BranchState,
}

/// Static sender configuration shown on request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub stream_name: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub public: Option<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub protocol: Option<String>,
    pub mount: Option<String>,
}

impl BranchInfo {
    /// Sender properties making up the static information.
    pub const PROPERTIES: [&'static str; 10] =
        ["streamname", "description", "genre", "public", "url", "username", "ip", "port", "protocol", "mount"];

    /// Build from `(property, value)` pairs read off the sender node.
    #[must_use]
    pub fn from_properties<'a>(
        name: impl Into<String>,
        properties: impl IntoIterator<Item = (&'a str, String)>,
    ) -> Self {
        let mut info = Self { name: name.into(), ..Self::default() };
        for (key, value) in properties {
            let slot = match key {
                "streamname" => &mut info.stream_name,
                "description" => &mut info.description,
                "genre" => &mut info.genre,
                "public" => &mut info.public,
                "url" => &mut info.url,
                "username" => &mut info.username,
                "ip" => &mut info.host,
                "port" => &mut info.port,
                "protocol" => &mut info.protocol,
                "mount" => &mut info.mount,
                _ => continue,
            };
            *slot = Some(value);
        }
        info
    }

    /// Labelled fields in display order.
    #[must_use]
    pub fn fields(&self) -> [(&'static str, Option<&str>); 10] {
        [
            ("Stream name", self.stream_name.as_deref()),
            ("Description", self.description.as_deref()),
            ("Genre", self.genre.as_deref()),
            ("Public", self.public.as_deref()),
            ("URL", self.url.as_deref()),
            ("Username", self.username.as_deref()),
            ("Host", self.host.as_deref()),
            ("Port", self.port.as_deref()),
            ("Protocol", self.protocol.as_deref()),
            ("Mountpoint", self.mount.as_deref()),
        ]
    }
}

/// Update pushed from the event loop to the status display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StatusUpdate {
    /// Static information for every branch, sent once at startup
    Info { branches: Vec<BranchInfo> },
    /// Current stream running time
    Position { running_time: Duration },
    /// RMS levels in dB
    Levels { left: f64, right: f64 },
    /// Running state of every branch, in configuration order
    Branches { branches: Vec<BranchStatus> },
    /// The display must exit
    Stop,
}

/// Request sent back from the status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiRequest {
    /// The user asked to quit
    Close,
}

/// Convert an RMS level in dB to a linear 0.0..=1.0 value.
#[must_use]
pub fn normalize_db(db: f64) -> f64 {
    10f64.powf(db / 20.0).clamp(0.0, 1.0)
}

/// Format a running time as `H:MM:SS.mmm`.
#[must_use]
pub fn format_running_time(time: Duration) -> String {
    let secs = time.as_secs();
    format!("{}:{:02}:{:02}.{:03}", secs / 3600, (secs / 60) % 60, secs % 60, time.subsec_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_info_from_sender_properties() {
        let info = BranchInfo::from_properties(
            "radio1",
            [
                ("streamname", "radio1".to_string()),
                ("ip", "icecast.example.org".to_string()),
                ("port", "8000".to_string()),
                ("bitrate", "128".to_string()),
            ],
        );

        assert_eq!(info.stream_name.as_deref(), Some("radio1"));
        assert_eq!(info.host.as_deref(), Some("icecast.example.org"));
        assert_eq!(info.port.as_deref(), Some("8000"));
        assert_eq!(info.genre, None);
        assert_eq!(info.fields()[6], ("Host", Some("icecast.example.org")));
    }

    #[test]
    fn test_normalize_db() {
        assert!((normalize_db(0.0) - 1.0).abs() < f64::EPSILON);
        assert!((normalize_db(-20.0) - 0.1).abs() < 1e-9);
        assert!(normalize_db(f64::NEG_INFINITY).abs() < f64::EPSILON);
        assert!((normalize_db(6.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_format_running_time() {
        assert_eq!(format_running_time(Duration::from_millis(3_723_045)), "1:02:03.045");
        assert_eq!(format_running_time(Duration::ZERO), "0:00:00.000");
    }
}
