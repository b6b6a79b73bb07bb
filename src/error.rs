use thiserror::Error;

/// Failures reported synchronously by the scan controller.
///
/// Per-port network problems never show up here; they are folded into probe
/// outcomes and surfaced through the observer.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid port range {start}-{end} (start > end)")]
    InvalidRange { start: u16, end: u16 },

    #[error("a scan is already running")]
    AlreadyRunning,

    #[error("failed to resolve host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("scan task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}
