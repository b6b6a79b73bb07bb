//! Renderers for persisted scan results.
//!
//! These produce strings only; writing them to disk is left to the caller.

use crate::types::{ScanRecord, ScanState};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fmt::Write as _;

/// Pretty JSON with 4-space indentation.
pub fn to_json(record: &ScanRecord) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    record.serialize(&mut ser)?;
    // serde_json only emits valid UTF-8.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Human-readable report. `state` decides the `Status:` line.
pub fn to_text(record: &ScanRecord, state: ScanState) -> String {
    let status = match state {
        ScanState::Completed => "Completed",
        ScanState::Cancelled => "Cancelled",
        _ => "In Progress",
    };
    let mut out = String::new();
    let _ = writeln!(out, "=== Scan Results ===");
    let _ = writeln!(out, "Target IP: {}", record.ip);
    let _ = writeln!(out, "Scan Range: {} - {}", record.start_port, record.end_port);
    let _ = writeln!(out, "Timestamp: {}", record.timestamp);
    let _ = writeln!(out, "Status: {status}");
    let _ = writeln!(out);
    let _ = writeln!(out, "=== Open Ports ===");
    for p in &record.open_ports {
        let _ = writeln!(out, "{} ({})", p.port, p.service);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "=== Logs ===");
    let _ = writeln!(out, "{}", record.logs);
    let _ = writeln!(out);
    let _ = writeln!(out, "=== Summary ===");
    let _ = writeln!(out, "Total Ports Scanned: {}", ports_covered(record));
    let _ = writeln!(out, "Open Ports Found: {}", record.open_ports.len());
    out
}

/// Default file name: `scan_results_<ip>_<timestamp>.<ext>` with the timestamp
/// made filesystem-safe.
pub fn default_file_name(record: &ScanRecord, ext: &str) -> String {
    let stamp = record.timestamp.replace(' ', "_").replace(':', "-");
    format!("scan_results_{}_{}.{}", record.ip, stamp, ext)
}

fn ports_covered(record: &ScanRecord) -> u32 {
    if record.end_port < record.start_port {
        0
    } else {
        u32::from(record.end_port) - u32::from(record.start_port) + 1
    }
}
