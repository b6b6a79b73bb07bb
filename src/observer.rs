//! Event hooks the scan controller reports through.
//!
//! Front ends implement [`ScanObserver`] to render progress, list open ports, or
//! play notification sounds. Every method has a no-op default, so an observer
//! only overrides what it presents.

use crate::progress::ProgressSnapshot;
use crate::types::PortResult;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, warn};

/// A fire-and-forget notification request, e.g. an audio cue in a GUI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    PortDiscovered,
    ScanCompleted,
}

/// Receiver of scan events.
///
/// Called from the controller's task; implementations must not block for long.
pub trait ScanObserver: Send + Sync {
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}

    fn on_port_opened(&self, _result: &PortResult) {}

    fn on_probe_error(&self, _port: u16, _reason: &str) {}

    fn on_scan_finished(&self, _duration: Duration, _open_ports: &[PortResult], _was_cancelled: bool) {}

    fn on_log(&self, _timestamp: OffsetDateTime, _message: &str) {}

    /// Errors are logged by the controller and otherwise ignored.
    fn on_cue(&self, _cue: Cue) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Observer that forwards the interesting events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ScanObserver for TracingObserver {
    fn on_port_opened(&self, result: &PortResult) {
        info!(port = result.port, service = %result.service, "open port");
    }

    fn on_probe_error(&self, port: u16, reason: &str) {
        warn!(port, reason, "probe error");
    }

    fn on_scan_finished(&self, duration: Duration, open_ports: &[PortResult], was_cancelled: bool) {
        info!(
            open = open_ports.len(),
            elapsed_s = duration.as_secs_f64(),
            was_cancelled,
            "scan finished"
        );
    }
}
