use crate::clock::log_time;
use crate::config::ScanConfig;
use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;
use time::OffsetDateTime;

/// What to scan. Immutable once handed to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub host: String,
    pub start_port: u16,
    /// Inclusive.
    pub end_port: u16,
    pub per_port_timeout: Duration,
    pub max_concurrent_probes: usize,
}

impl ScanRequest {
    /// Build a request for `host` over `start_port..=end_port` using the timeout and
    /// concurrency from `config`.
    pub fn new(host: impl Into<String>, start_port: u16, end_port: u16, config: &ScanConfig) -> Self {
        Self {
            host: host.into(),
            start_port,
            end_port,
            per_port_timeout: config.per_port_timeout(),
            max_concurrent_probes: config.concurrency,
        }
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.start_port > self.end_port {
            return Err(ScanError::InvalidRange {
                start: self.start_port,
                end: self.end_port,
            });
        }
        Ok(())
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start_port..=self.end_port
    }

    /// Number of ports in the range; zero for an inverted range.
    pub fn port_count(&self) -> u32 {
        if self.start_port > self.end_port {
            0
        } else {
            u32::from(self.end_port) - u32::from(self.start_port) + 1
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ports().contains(&port)
    }
}

/// One discovered open port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub service: String,
    #[serde(with = "log_time")]
    pub timestamp: OffsetDateTime,
}

impl PortResult {
    pub fn new(port: u16, service: impl Into<String>) -> Self {
        Self {
            port,
            service: service.into(),
            timestamp: crate::clock::now(),
        }
    }
}

/// Lifecycle of a scan session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    /// Cancellation requested; in-flight probes are still draining.
    Cancelling,
    Completed,
    Cancelled,
}

impl ScanState {
    /// Running or draining after a cancel request.
    pub fn is_active(self) -> bool {
        matches!(self, ScanState::Running | ScanState::Cancelling)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Completed | ScanState::Cancelled)
    }
}

/// A timestamped line in the session log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    #[serde(with = "log_time")]
    pub timestamp: OffsetDateTime,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {}",
            crate::clock::format_log_time(self.timestamp),
            self.message
        )
    }
}

/// Serializable snapshot handed to the result file writers.
///
/// Field names are consumed verbatim by the JSON writer. Timestamps are local time when
/// [`crate::clock::init_local_offset`] succeeded, UTC otherwise; the text carries no offset.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ip: String,
    pub start_port: u16,
    pub end_port: u16,
    pub open_ports: Vec<PortResult>,
    pub logs: String,
    pub timestamp: String,
}

/// Read-only projection of the controller returned by `status()`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanStatus {
    pub state: ScanState,
    pub host: Option<String>,
    pub total: u32,
    pub scanned: u32,
    pub open: u32,
    #[serde(with = "log_time::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "log_time::option")]
    pub finished_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_count_is_inclusive() {
        let cfg = ScanConfig::default();
        assert_eq!(ScanRequest::new("h", 1, 1024, &cfg).port_count(), 1024);
        assert_eq!(ScanRequest::new("h", 22, 22, &cfg).port_count(), 1);
        assert_eq!(ScanRequest::new("h", 0, u16::MAX, &cfg).port_count(), 65_536);
        assert_eq!(ScanRequest::new("h", 10, 9, &cfg).port_count(), 0);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let req = ScanRequest::new("h", 100, 10, &ScanConfig::default());
        assert!(matches!(
            req.validate(),
            Err(ScanError::InvalidRange { start: 100, end: 10 })
        ));
    }

    #[test]
    fn port_result_serializes_expected_fields() {
        let r = PortResult {
            port: 22,
            service: "ssh".into(),
            timestamp: time::macros::datetime!(2024-05-01 12:00:00 UTC),
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["port"], 22);
        assert_eq!(v["service"], "ssh");
        assert_eq!(v["timestamp"], "2024-05-01 12:00:00");
    }

    #[test]
    fn state_helpers() {
        assert!(ScanState::Cancelling.is_active());
        assert!(!ScanState::Idle.is_active());
        assert!(ScanState::Cancelled.is_terminal());
        assert!(!ScanState::Running.is_terminal());
    }
}
