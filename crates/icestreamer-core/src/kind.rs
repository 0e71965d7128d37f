//! Node kinds and the factory names the media engine knows them by.

use serde::{Deserialize, Serialize};

/// Factory name of the network sender node.
pub const SENDER_FACTORY: &str = "shout2send";

/// Processing node kinds used by the streamer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Top-level graph container
    Pipeline,
    /// Nested container (source or branch wrapper)
    Container,
    /// Capture node for the selected backend
    Capture(SourceKind),
    /// Format/channel/rate constraint filter
    Constraint,
    /// Fan-out duplicating one input to many outputs
    FanOut,
    /// Bounded buffer in front of each branch
    Queue,
    /// Sample format converter
    Convert,
    /// Sample rate converter
    Resample,
    /// Audio encoder
    Encoder(EncoderKind),
    /// Container muxer
    Muxer(ContainerKind),
    /// Icecast network sender
    Sender,
    /// RMS level meter feeding the status display
    Level,
}

impl NodeKind {
    /// Engine factory name for this kind.
    #[must_use]
    pub fn factory(self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Container => "bin",
            Self::Capture(source) => source.factory(),
            Self::Constraint => "capsfilter",
            Self::FanOut => "tee",
            Self::Queue => "queue",
            Self::Convert => "audioconvert",
            Self::Resample => "audioresample",
            Self::Encoder(encoder) => encoder.factory(),
            Self::Muxer(container) => container.factory(),
            Self::Sender => SENDER_FACTORY,
            Self::Level => "level",
        }
    }

    /// Deterministic node name for a node of this kind owned by `group`.
    #[must_use]
    pub fn node_name(self, group: &str) -> String {
        format!("{}-{group}", self.factory())
    }
}

/// Capture backends accepted in the `input` group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Auto,
    Alsa,
    Pulse,
    Jack,
    PipeWire,
    Test,
}

impl SourceKind {
    /// Parse the `source` selector value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::Auto),
            "alsa" => Some(Self::Alsa),
            "pulse" => Some(Self::Pulse),
            "jack" => Some(Self::Jack),
            "pipewire" => Some(Self::PipeWire),
            "test" => Some(Self::Test),
            _ => None,
        }
    }

    /// Engine factory name of the capture node.
    #[must_use]
    pub fn factory(self) -> &'static str {
        match self {
            Self::Auto => "autoaudiosrc",
            Self::Alsa => "alsasrc",
            Self::Pulse => "pulsesrc",
            Self::Jack => "jackaudiosrc",
            Self::PipeWire => "pipewiresrc",
            Self::Test => "audiotestsrc",
        }
    }
}

/// Encoders a destination may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    Vorbis,
    Opus,
    Mp3,
}

impl EncoderKind {
    /// Parse the `encoder` selector value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "vorbis" => Some(Self::Vorbis),
            "opus" => Some(Self::Opus),
            "mp3" => Some(Self::Mp3),
            _ => None,
        }
    }

    #[must_use]
    pub fn factory(self) -> &'static str {
        match self {
            Self::Vorbis => "vorbisenc",
            Self::Opus => "opusenc",
            Self::Mp3 => "lamemp3enc",
        }
    }

    /// Whether the encoded stream must be wrapped in a container.
    ///
    /// MP3 is sent as a raw elementary stream.
    #[must_use]
    pub fn needs_container(self) -> bool {
        !matches!(self, Self::Mp3)
    }
}

/// Containers for encoders that need one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Ogg,
    WebM,
}

impl ContainerKind {
    /// Parse the `container` selector value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ogg" => Some(Self::Ogg),
            "webm" => Some(Self::WebM),
            _ => None,
        }
    }

    #[must_use]
    pub fn factory(self) -> &'static str {
        match self {
            Self::Ogg => "oggmux",
            Self::WebM => "webmmux",
        }
    }
}
