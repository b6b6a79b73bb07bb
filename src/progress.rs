use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Point-in-time view of scan progress. Recomputed on every tick, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub scanned: u32,
    pub total: u32,
    pub elapsed: Duration,
    pub estimated_remaining: Duration,
}

impl ProgressSnapshot {
    /// Percentage complete in `0.0..=100.0`; `0.0` when there is nothing to scan.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.scanned.min(self.total)) / f64::from(self.total) * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.scanned >= self.total
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scanned {} of {} ports. Elapsed: {:.2}s, Estimated: {:.2}s",
            self.scanned,
            self.total,
            self.elapsed.as_secs_f64(),
            self.estimated_remaining.as_secs_f64()
        )
    }
}

/// Linear ETA from the mean per-port latency observed so far:
/// `(elapsed / scanned) * (total - scanned)`, or zero before the first port.
pub fn snapshot(total: u32, scanned: u32, elapsed: Duration) -> ProgressSnapshot {
    let estimated_remaining = if scanned == 0 {
        Duration::ZERO
    } else {
        (elapsed / scanned) * total.saturating_sub(scanned)
    };
    ProgressSnapshot {
        scanned,
        total,
        elapsed,
        estimated_remaining,
    }
}
