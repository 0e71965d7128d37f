//! Streamer configuration.
//!
//! The file is TOML with one table per group:
//!
//! ```toml
//! [input]
//! source = "pulse"
//! rate = 44100
//!
//! [radio1]
//! encoder = "vorbis"
//! container = "ogg"
//! ip = "icecast.example.org"
//! ```
//!
//! Table order is kept, so destinations are built in file order.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use tracing::{debug, info};

use icestreamer_core::{Group, StreamerConfig};

/// File name looked up in the user configuration directory.
const CONFIG_FILE: &str = "icestreamer.toml";
/// System-wide fallback.
const SYSTEM_CONFIG: &str = "/etc/icestreamer.toml";

/// Load the configuration from `explicit`, or from the default location.
///
/// # Errors
/// Returns an error if the file is missing, unreadable or malformed.
pub fn load_config(explicit: Option<&Path>) -> Result<StreamerConfig> {
    let path = explicit.map_or_else(default_config_path, Path::to_path_buf);
    info!(?path, "Loading configuration");

    let content =
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read config file: {path:?}"))?;
    parse_config(&content).with_context(|| format!("Failed to parse config file: {path:?}"))
}

/// Parse configuration text into groups.
///
/// # Errors
/// Returns an error on invalid TOML, a top-level key that is not a table, or
/// a property value that is an array or a nested table.
pub fn parse_config(content: &str) -> Result<StreamerConfig> {
    let table: toml::Table = toml::from_str(content)?;
    let mut config = StreamerConfig::new();

    for (name, value) in table {
        let toml::Value::Table(entries) = value else {
            bail!("top-level key '{name}' must be a [group]");
        };

        let mut group = Group::new(&name);
        for (key, value) in entries {
            let text = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Datetime(d) => d.to_string(),
                toml::Value::Array(_) | toml::Value::Table(_) => {
                    bail!("value of '{key}' in group '{name}' must be a string, number or boolean");
                }
            };
            group.insert(key, text);
        }

        debug!(group = %name, "Loaded group");
        config.push(group)?;
    }

    Ok(config)
}

/// Default configuration path: the user config directory if the file exists
/// there, the system-wide file otherwise.
fn default_config_path() -> PathBuf {
    ProjectDirs::from("org", "icestreamer", "icestreamer")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG))
}
