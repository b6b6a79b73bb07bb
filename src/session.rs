use crate::clock;
use crate::types::{LogEntry, PortResult, ScanRecord, ScanRequest, ScanState};
use std::time::Duration;
use time::OffsetDateTime;

/// Full record of one scan invocation: the request plus everything it produced.
#[derive(Debug, Clone)]
pub struct ScanSession {
    request: ScanRequest,
    state: ScanState,
    open_ports: Vec<PortResult>,
    logs: Vec<LogEntry>,
    started_at: Option<OffsetDateTime>,
    finished_at: Option<OffsetDateTime>,
    last_dispatched: Option<u16>,
}

impl ScanSession {
    pub fn new(request: ScanRequest) -> Self {
        Self {
            request,
            state: ScanState::Idle,
            open_ports: Vec::new(),
            logs: Vec::new(),
            started_at: None,
            finished_at: None,
            last_dispatched: None,
        }
    }

    /// Move from `Idle` to `Running`, stamping the start time.
    /// Returns `false` (and changes nothing) from any other state.
    pub fn begin(&mut self) -> bool {
        if self.state != ScanState::Idle {
            return false;
        }
        self.state = ScanState::Running;
        self.open_ports.clear();
        self.logs.clear();
        self.started_at = Some(clock::now());
        self.finished_at = None;
        self.last_dispatched = None;
        true
    }

    /// `Running` -> `Cancelling`. No-op from other states.
    pub fn request_cancel(&mut self) -> bool {
        if self.state != ScanState::Running {
            return false;
        }
        self.state = ScanState::Cancelling;
        true
    }

    /// Enter the terminal state. `finished_at` is written exactly once; later calls
    /// return `false`.
    pub fn finish(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = match self.state {
            ScanState::Cancelling => ScanState::Cancelled,
            _ => ScanState::Completed,
        };
        self.finished_at = Some(clock::now());
        true
    }

    /// Append a discovered port. Rejected outside an active scan, for ports outside
    /// the requested range, and for ports already recorded.
    pub fn push_open(&mut self, result: PortResult) -> bool {
        if !self.state.is_active()
            || !self.request.contains(result.port)
            || self.open_ports.iter().any(|r| r.port == result.port)
        {
            return false;
        }
        self.open_ports.push(result);
        true
    }

    pub fn push_log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    pub fn mark_dispatched(&mut self, port: u16) {
        self.last_dispatched = Some(port);
    }

    pub fn request(&self) -> &ScanRequest {
        &self.request
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Open ports in discovery order.
    pub fn open_ports(&self) -> &[PortResult] {
        &self.open_ports
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn started_at(&self) -> Option<OffsetDateTime> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<OffsetDateTime> {
        self.finished_at
    }

    pub fn last_dispatched(&self) -> Option<u16> {
        self.last_dispatched
    }

    /// Wall-clock duration, up to now for a scan still in progress.
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(clock::now);
        Some(clock::duration_between(start, end))
    }

    /// Log lines joined as `"<timestamp> - <message>"`.
    pub fn log_text(&self) -> String {
        self.logs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Snapshot for the result file writers.
    ///
    /// A scan that did not complete reports the last dispatched port as its end.
    pub fn to_record(&self) -> ScanRecord {
        let end_port = match self.state {
            ScanState::Completed | ScanState::Idle => self.request.end_port,
            _ => self.last_dispatched.unwrap_or(self.request.start_port),
        };
        ScanRecord {
            ip: self.request.host.clone(),
            start_port: self.request.start_port,
            end_port,
            open_ports: self.open_ports.clone(),
            logs: self.log_text(),
            timestamp: clock::format_log_time(clock::now()),
        }
    }
}
