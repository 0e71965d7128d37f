//! Console status display.
//!
//! Runs on its own thread and only consumes [`StatusUpdate`]s. Commands typed
//! on stdin:
//! - `info <stream>` toggles the static configuration of a stream
//! - `q` asks the daemon to shut down

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use icestreamer_core::status::{format_running_time, normalize_db};
use icestreamer_core::{BranchInfo, BranchStatus, StatusUpdate, UiRequest};

/// Width of one level bar.
const BAR_WIDTH: usize = 20;
/// How often the renderer checks for typed commands.
const COMMAND_POLL: Duration = Duration::from_millis(50);

/// Output format of the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable console output
    Text,
    /// One JSON object per update
    Json,
}

/// Result of a typed command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Print(String),
    Close,
    Nothing,
}

/// Display state and formatting, free of any I/O.
#[derive(Debug)]
struct Renderer {
    format: Format,
    info: Vec<BranchInfo>,
    shown: BTreeSet<String>,
    last_branches: Option<Vec<BranchStatus>>,
    running_time: Duration,
}

impl Renderer {
    fn new(format: Format) -> Self {
        Self { format, info: Vec::new(), shown: BTreeSet::new(), last_branches: None, running_time: Duration::ZERO }
    }

    /// Text to emit for an update, if any.
    fn apply(&mut self, update: &StatusUpdate) -> Option<String> {
        if self.format == Format::Json {
            if let StatusUpdate::Info { branches } = update {
                self.info.clone_from(branches);
            }
            return serde_json::to_string(update).ok().map(|line| line + "\n");
        }

        match update {
            StatusUpdate::Info { branches } => {
                self.info.clone_from(branches);
                let names: Vec<_> = branches.iter().map(|b| b.name.as_str()).collect();
                Some(format!("streams: {}\n", names.join(", ")))
            }
            StatusUpdate::Position { running_time } => {
                self.running_time = *running_time;
                None
            }
            StatusUpdate::Levels { left, right } => Some(format!(
                "\r{}  L {}  R {}",
                format_running_time(self.running_time),
                level_bar(*left),
                level_bar(*right)
            )),
            StatusUpdate::Branches { branches } => {
                if self.last_branches.as_ref() == Some(branches) {
                    return None;
                }
                self.last_branches = Some(branches.clone());
                let states: Vec<_> = branches.iter().map(|b| format!("{} [{}]", b.name, b.state)).collect();
                Some(format!("\n{}\n", states.join("  ")))
            }
            StatusUpdate::Stop => Some("\n".to_string()),
        }
    }

    /// Interpret one typed line.
    fn command(&mut self, line: &str) -> Reply {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("q" | "quit"), None) => Reply::Close,
            (Some("info"), Some(name)) => self.toggle_info(name),
            (None, _) => Reply::Nothing,
            _ => Reply::Print("commands: info <stream>, q\n".to_string()),
        }
    }

    fn toggle_info(&mut self, name: &str) -> Reply {
        let Some(info) = self.info.iter().find(|b| b.name == name) else {
            return Reply::Print(format!("no stream named '{name}'\n"));
        };

        if self.shown.remove(name) {
            return Reply::Print(format!("[{name}] info hidden\n"));
        }
        self.shown.insert(name.to_string());

        if self.format == Format::Json {
            return Reply::Print(serde_json::to_string(info).map(|line| line + "\n").unwrap_or_default());
        }

        let mut out = format!("[{name}]\n");
        for (label, value) in info.fields() {
            let _ = writeln!(out, "  {label:<12} {}", value.unwrap_or("-"));
        }
        Reply::Print(out)
    }
}

/// Bar of `#` proportional to the linear level of `db`.
fn level_bar(db: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = ((normalize_db(db) * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    format!("[{}{}]", "#".repeat(filled), " ".repeat(BAR_WIDTH - filled))
}

/// Handle to the running display thread.
pub struct StatusDisplay {
    handle: JoinHandle<()>,
}

impl StatusDisplay {
    /// Start the display.
    ///
    /// Returns the handle and the sender the event loop pushes updates into.
    /// `q` on stdin is forwarded to `ui_tx`.
    ///
    /// # Errors
    /// Returns an error if a thread cannot be spawned.
    pub fn spawn(format: Format, ui_tx: mpsc::Sender<UiRequest>) -> io::Result<(Self, std_mpsc::Sender<StatusUpdate>)> {
        let (update_tx, update_rx) = std_mpsc::channel();
        let (line_tx, line_rx) = std_mpsc::channel();

        // Blocked on stdin for the life of the process; never joined.
        thread::Builder::new().name("status-input".to_string()).spawn(move || read_commands(&line_tx))?;

        let handle = thread::Builder::new()
            .name("status".to_string())
            .spawn(move || run(Renderer::new(format), &update_rx, &line_rx, &ui_tx))?;

        info!(?format, "Status display started");
        Ok((Self { handle }, update_tx))
    }

    /// Wait for the display to exit after it received [`StatusUpdate::Stop`].
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("Status display thread panicked");
        }
    }
}

fn read_commands(line_tx: &std_mpsc::Sender<String>) {
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if line_tx.send(line).is_err() {
            break;
        }
    }
}

fn run(
    mut renderer: Renderer,
    updates: &std_mpsc::Receiver<StatusUpdate>,
    lines: &std_mpsc::Receiver<String>,
    ui_tx: &mpsc::Sender<UiRequest>,
) {
    let mut stdout = io::stdout();

    loop {
        match updates.recv_timeout(COMMAND_POLL) {
            Ok(update) => {
                let stop = update == StatusUpdate::Stop;
                if let Some(text) = renderer.apply(&update) {
                    emit(&mut stdout, &text);
                }
                if stop {
                    break;
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        while let Ok(line) = lines.try_recv() {
            match renderer.command(&line) {
                Reply::Print(text) => emit(&mut stdout, &text),
                Reply::Close => {
                    debug!("Close requested from the status display");
                    if ui_tx.blocking_send(UiRequest::Close).is_err() {
                        return;
                    }
                }
                Reply::Nothing => {}
            }
        }
    }

    debug!("Status display exited");
}

fn emit(stdout: &mut io::Stdout, text: &str) {
    let mut out = stdout.lock();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use icestreamer_core::BranchState;

    use super::*;

    fn info() -> StatusUpdate {
        StatusUpdate::Info {
            branches: vec![BranchInfo::from_properties(
                "radio1",
                [("streamname", "Radio One".to_string()), ("ip", "10.0.0.1".to_string())],
            )],
        }
    }

    #[test]
    fn test_level_bar_bounds() {
        assert_eq!(level_bar(0.0), format!("[{}]", "#".repeat(BAR_WIDTH)));
        assert_eq!(level_bar(-200.0), format!("[{}]", " ".repeat(BAR_WIDTH)));
    }

    #[test]
    fn test_unchanged_branches_are_not_reprinted() {
        let mut renderer = Renderer::new(Format::Text);
        let update = StatusUpdate::Branches {
            branches: vec![BranchStatus { name: "radio1".into(), state: BranchState::Active }],
        };

        assert_eq!(renderer.apply(&update).as_deref(), Some("\nradio1 [active]\n"));
        assert_eq!(renderer.apply(&update), None);
    }

    #[test]
    fn test_levels_line_carries_position() {
        let mut renderer = Renderer::new(Format::Text);
        assert_eq!(renderer.apply(&StatusUpdate::Position { running_time: Duration::from_millis(61_005) }), None);

        let line = renderer.apply(&StatusUpdate::Levels { left: 0.0, right: -200.0 }).unwrap();
        assert!(line.starts_with("\r0:01:01.005"));
    }

    #[test]
    fn test_info_toggles() {
        let mut renderer = Renderer::new(Format::Text);
        renderer.apply(&info());

        let Reply::Print(shown) = renderer.command("info radio1") else {
            panic!("expected output");
        };
        assert!(shown.contains("Radio One"));
        assert!(shown.contains("10.0.0.1"));

        assert_eq!(renderer.command("info radio1"), Reply::Print("[radio1] info hidden\n".to_string()));
        assert_eq!(renderer.command("info radio9"), Reply::Print("no stream named 'radio9'\n".to_string()));
    }

    #[test]
    fn test_quit_and_blank_lines() {
        let mut renderer = Renderer::new(Format::Text);
        assert_eq!(renderer.command("q"), Reply::Close);
        assert_eq!(renderer.command("   "), Reply::Nothing);
    }

    #[test]
    fn test_json_format_emits_every_update() {
        let mut renderer = Renderer::new(Format::Json);
        let line = renderer.apply(&StatusUpdate::Stop).unwrap();
        assert_eq!(line, "{\"type\":\"stop\"}\n");
    }
}
