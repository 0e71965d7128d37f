//! Streamer configuration model.
//!
//! The configuration is a list of named groups, each holding ordered
//! `key = value` string pairs. Two group names are reserved: [`INPUT_GROUP`]
//! describes the capture source and [`METADATA_GROUP`] the now-playing file.
//! Every other group is a destination stream, named after the group.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kind::{ContainerKind, EncoderKind, SourceKind};

/// Group describing the capture source.
pub const INPUT_GROUP: &str = "input";
/// Group describing the metadata file.
pub const METADATA_GROUP: &str = "metadata";

/// One named configuration group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    name: String,
    entries: Vec<(String, String)>,
}

impl Group {
    /// Create an empty group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), entries: Vec::new() }
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Iterate over all entries in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| Error::MissingKey {
            group: self.name.clone(),
            key: key.to_string(),
        })
    }

    fn positive_integer(&self, key: &str) -> Result<Option<u32>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };

        match value.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            Ok(_) => Err(self.invalid(key, value, "must be greater than zero")),
            Err(e) => Err(self.invalid(key, value, &e.to_string())),
        }
    }

    fn invalid(&self, key: &str, value: &str, reason: &str) -> Error {
        Error::InvalidValue {
            group: self.name.clone(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Encoder and (when the encoder needs one) container selected by a
    /// destination group.
    ///
    /// # Errors
    /// Returns an error if `encoder` is missing or unknown, or if a required
    /// `container` is missing or unknown.
    pub fn encoding(&self) -> Result<(EncoderKind, Option<ContainerKind>)> {
        let value = self.require("encoder")?;
        let encoder = EncoderKind::parse(value).ok_or_else(|| Error::UnknownEncoder {
            group: self.name.clone(),
            value: value.to_string(),
        })?;

        if !encoder.needs_container() {
            return Ok((encoder, None));
        }

        let value = self.require("container")?;
        let container = ContainerKind::parse(value).ok_or_else(|| Error::UnknownContainer {
            group: self.name.clone(),
            value: value.to_string(),
        })?;

        Ok((encoder, Some(container)))
    }
}

/// Optional format constraint applied to the capture output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Raw sample format (e.g. `S16LE`)
    pub format: Option<String>,
    /// Channel count
    pub channels: Option<u32>,
    /// Sample rate in Hz
    pub rate: Option<u32>,
}

impl Constraint {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.format.is_none() && self.channels.is_none() && self.rate.is_none()
    }
}

/// The whole streamer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerConfig {
    groups: Vec<Group>,
}

impl StreamerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group, keeping configuration order.
    ///
    /// # Errors
    /// Returns an error if a group with the same name already exists.
    pub fn push(&mut self, group: Group) -> Result<()> {
        if self.group(group.name()).is_some() {
            return Err(Error::DuplicateGroup(group.name.clone()));
        }
        self.groups.push(group);
        Ok(())
    }

    /// Builder-style [`push`](Self::push).
    ///
    /// # Errors
    /// Returns an error if a group with the same name already exists.
    pub fn with(mut self, group: Group) -> Result<Self> {
        self.push(group)?;
        Ok(self)
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Whether `name` is one of the reserved group names.
    #[must_use]
    pub fn is_reserved(name: &str) -> bool {
        name == INPUT_GROUP || name == METADATA_GROUP
    }

    /// Destination groups in configuration order.
    pub fn destinations(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter().filter(|g| !Self::is_reserved(&g.name))
    }

    /// The `input` group, or an empty one if absent.
    #[must_use]
    pub fn input(&self) -> Group {
        self.group(INPUT_GROUP).cloned().unwrap_or_else(|| Group::new(INPUT_GROUP))
    }

    /// Capture backend selected by `input.source`.
    ///
    /// # Errors
    /// Returns an error if the selector is unset or not a known backend.
    pub fn source_kind(&self) -> Result<SourceKind> {
        let input = self.input();
        let value = input.require("source")?;
        SourceKind::parse(value).ok_or_else(|| Error::UnknownSource(value.to_string()))
    }

    /// Format constraint requested in the `input` group.
    ///
    /// # Errors
    /// Returns an error if `channels` or `rate` is not a positive integer.
    pub fn constraint(&self) -> Result<Constraint> {
        let input = self.input();
        Ok(Constraint {
            format: input.get("format").map(str::to_string),
            channels: input.positive_integer("channels")?,
            rate: input.positive_integer("rate")?,
        })
    }

    /// Path of the now-playing file, if configured.
    #[must_use]
    pub fn metadata_file(&self) -> Option<PathBuf> {
        self.group(METADATA_GROUP).and_then(|g| g.get("file")).map(PathBuf::from)
    }
}
