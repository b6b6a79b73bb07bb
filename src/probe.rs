use crate::ports::service_name_or_unknown;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, warn};

/// Result of one connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Handshake completed; carries the resolved service name.
    Open(String),
    ClosedOrFiltered,
    /// The attempt failed for a reason unrelated to the target port, such as
    /// running out of file descriptors.
    Error(String),
}

impl ProbeOutcome {
    pub fn is_open(&self) -> bool {
        matches!(self, ProbeOutcome::Open(_))
    }
}

/// Attempt a TCP connect to `(addr, port)` bounded by `timeout`.
///
/// The stream is dropped immediately on success; nothing is read or written.
pub async fn probe(addr: IpAddr, port: u16, timeout: Duration) -> ProbeOutcome {
    let target = SocketAddr::new(addr, port);
    match time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => ProbeOutcome::Open(service_name_or_unknown(port).to_string()),
        Ok(Err(e)) => classify_connect_error(&e),
        Err(_elapsed) => ProbeOutcome::ClosedOrFiltered,
    }
}

pub type ProbeFuture = Pin<Box<dyn Future<Output = ProbeOutcome> + Send>>;

/// The per-port check a sweep runs. [`TcpProber`] is the real one.
pub trait Prober: Send + Sync {
    fn probe(&self, addr: IpAddr, port: u16, timeout: Duration) -> ProbeFuture;
}

/// Plain TCP connect, see [`probe`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl Prober for TcpProber {
    fn probe(&self, addr: IpAddr, port: u16, timeout: Duration) -> ProbeFuture {
        Box::pin(probe(addr, port, timeout))
    }
}

/// Map a connect error to an outcome. Only local resource exhaustion counts as
/// an error; everything else means the port did not accept us.
pub fn classify_connect_error(e: &io::Error) -> ProbeOutcome {
    if is_resource_exhaustion(e) {
        return ProbeOutcome::Error(e.to_string());
    }
    ProbeOutcome::ClosedOrFiltered
}

fn is_resource_exhaustion(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::OutOfMemory {
        return true;
    }
    // ENFILE / EMFILE
    cfg!(unix) && matches!(e.raw_os_error(), Some(23) | Some(24))
}

/// Advisory liveness check: can we complete a handshake on `port` within `timeout`?
///
/// Many hosts drop exactly this port while serving others, so callers should warn
/// on `false` rather than refuse to scan.
pub async fn is_reachable(addr: IpAddr, port: u16, timeout: Duration) -> bool {
    let target = SocketAddr::new(addr, port);
    match time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(%target, error = %e, "reachability check refused");
            false
        }
        Err(_) => {
            warn!(%target, ?timeout, "reachability check timed out");
            false
        }
    }
}
