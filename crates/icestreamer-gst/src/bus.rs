//! Pipeline bus monitoring.
//!
//! Bus messages are popped on a dedicated thread and forwarded to the event
//! loop as [`EngineEvent`]s, so no engine callback ever runs on the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use icestreamer_core::{FaultDomain, Severity};
use icestreamer_engine::{EngineEvent, RawFault};

/// How long one bus poll blocks before checking the stop flag.
const POLL_INTERVAL_MS: u64 = 100;

/// Structure name of level meter reports.
const LEVEL_MESSAGE: &str = "level";

/// Forwards bus messages until dropped.
#[derive(Debug)]
pub struct BusMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BusMonitor {
    /// Start popping messages from `bus`.
    ///
    /// # Errors
    /// Returns an error if the monitor thread cannot be spawned.
    pub fn spawn(bus: gst::Bus, event_tx: mpsc::Sender<EngineEvent>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("gst-bus".to_string())
            .spawn(move || Self::run(&bus, &event_tx, &thread_stop))?;

        Ok(Self { stop, handle: Some(handle) })
    }

    fn run(bus: &gst::Bus, event_tx: &mpsc::Sender<EngineEvent>, stop: &AtomicBool) {
        info!("Bus monitor started");
        let timeout = gst::ClockTime::from_mseconds(POLL_INTERVAL_MS);

        while !stop.load(Ordering::Relaxed) {
            let Some(msg) = bus.timed_pop(timeout) else {
                continue;
            };
            let Some(event) = translate(&msg) else {
                continue;
            };
            if event_tx.blocking_send(event).is_err() {
                debug!("Event receiver dropped, stopping bus monitor");
                break;
            }
        }

        info!("Bus monitor exited");
    }
}

impl Drop for BusMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Bus monitor thread panicked");
        }
    }
}

/// Convert a bus message into an engine event, if it is one we act on.
#[must_use]
pub fn translate(msg: &gst::Message) -> Option<EngineEvent> {
    use gst::MessageView;

    match msg.view() {
        MessageView::Error(err) => Some(EngineEvent::Fault(fault(
            Severity::Error,
            msg,
            &err.error(),
            err.debug().map(|d| d.to_string()),
        ))),
        MessageView::Warning(w) => Some(EngineEvent::Fault(fault(
            Severity::Warning,
            msg,
            &w.error(),
            w.debug().map(|d| d.to_string()),
        ))),
        MessageView::Element(element) => {
            let s = element.structure()?;
            if s.name() != LEVEL_MESSAGE {
                return None;
            }
            let running_time = s.get::<u64>("running-time").map_or(Duration::ZERO, Duration::from_nanos);
            let rms = s
                .get::<glib::ValueArray>("rms")
                .map(|values| values.iter().filter_map(|v| v.get::<f64>().ok()).collect())
                .unwrap_or_default();
            Some(EngineEvent::Level { running_time, rms })
        }
        MessageView::Eos(_) => Some(EngineEvent::EndOfStream),
        _ => None,
    }
}

fn fault(severity: Severity, msg: &gst::Message, error: &glib::Error, debug: Option<String>) -> RawFault {
    let src = msg.src();
    RawFault {
        severity,
        domain: domain(error),
        source: src.map(|s| s.name().to_string()),
        parent: src.and_then(GstObjectExt::parent).map(|p| p.name().to_string()),
        message: error.message().to_string(),
        debug,
    }
}

fn domain(error: &glib::Error) -> FaultDomain {
    if error.is::<gst::ResourceError>() {
        FaultDomain::Resource
    } else if error.is::<gst::StreamError>() {
        FaultDomain::Stream
    } else if error.is::<gst::CoreError>() {
        FaultDomain::Core
    } else if error.is::<gst::LibraryError>() {
        FaultDomain::Library
    } else {
        FaultDomain::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_sender() -> (gst::Bin, gst::Bin) {
        gst::init().expect("gstreamer initialised");
        let container = gst::Bin::builder().name("bin-radio1").build();
        let sender = gst::Bin::builder().name("shout2send-radio1").build();
        container.add(&sender).expect("added");
        (container, sender)
    }

    #[test]
    fn test_resource_error_names_source_and_parent() {
        let (_container, sender) = branch_sender();
        let msg = gst::message::Error::builder(gst::ResourceError::OpenWrite, "Could not connect to server")
            .src(&sender)
            .debug("shout_open failed")
            .build();

        let Some(EngineEvent::Fault(fault)) = translate(&msg) else {
            panic!("expected a fault");
        };
        assert_eq!(fault.severity, Severity::Error);
        assert_eq!(fault.domain, FaultDomain::Resource);
        assert_eq!(fault.source.as_deref(), Some("shout2send-radio1"));
        assert_eq!(fault.parent.as_deref(), Some("bin-radio1"));
        assert_eq!(fault.debug.as_deref(), Some("shout_open failed"));
    }

    #[test]
    fn test_warning_and_stream_domain() {
        let (_container, sender) = branch_sender();
        let msg = gst::message::Warning::builder(gst::StreamError::Format, "odd caps").src(&sender).build();

        let Some(EngineEvent::Fault(fault)) = translate(&msg) else {
            panic!("expected a fault");
        };
        assert_eq!(fault.severity, Severity::Warning);
        assert_eq!(fault.domain, FaultDomain::Stream);
    }

    #[test]
    fn test_unrelated_element_message_is_ignored() {
        gst::init().expect("gstreamer initialised");
        let msg = gst::message::Element::new(gst::Structure::new_empty("not-level"));
        assert_eq!(translate(&msg), None);
    }
}
