use crate::clock;
use crate::config::{ScanConfig, MAX_CONCURRENT_PROBES};
use crate::error::ScanError;
use crate::netdetect;
use crate::observer::{Cue, ScanObserver};
use crate::probe::{self, ProbeOutcome, Prober, TcpProber};
use crate::progress;
use crate::session::ScanSession;
use crate::types::{LogEntry, PortResult, ScanRecord, ScanRequest, ScanStatus};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives scans over one target at a time.
///
/// - Bounds concurrent connect attempts with a `Semaphore` sized from the request.
/// - Cancellation is cooperative: a probe that has not connected yet skips its port,
///   probes already connecting run to their timeout.
/// - Every dispatched probe is joined before the session reaches a terminal state.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct ScanController {
    shared: Arc<Shared>,
}

struct Shared {
    config: ScanConfig,
    prober: Arc<dyn Prober>,
    inner: Mutex<ControllerState>,
}

#[derive(Default)]
struct ControllerState {
    session: Option<ScanSession>,
    cancel: Option<CancellationToken>,
    scanned: u32,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScanController {
    pub fn new(config: ScanConfig) -> Self {
        Self::with_prober(config, Arc::new(TcpProber))
    }

    /// Controller whose sweeps check each port with `prober` instead of a TCP connect.
    pub fn with_prober(config: ScanConfig, prober: Arc<dyn Prober>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                prober,
                inner: Mutex::new(ControllerState::default()),
            }),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.shared.config
    }

    /// Validate `request`, resolve its host, and launch the sweep in the background.
    ///
    /// Fails without touching the current session when the range is inverted, the
    /// host cannot be resolved, or another scan is still active. A new scan may
    /// start once the previous one is `Completed` or `Cancelled`.
    pub async fn start(
        &self,
        request: ScanRequest,
        observer: Arc<dyn ScanObserver>,
    ) -> Result<ScanHandle, ScanError> {
        request.validate()?;
        if self.status().state.is_active() {
            return Err(ScanError::AlreadyRunning);
        }

        let addr = netdetect::resolve_host(&request.host)
            .await
            .map_err(|source| ScanError::Resolve {
                host: request.host.clone(),
                source,
            })?;

        let cancel = CancellationToken::new();
        {
            let mut state = self.shared.lock();
            if state
                .session
                .as_ref()
                .is_some_and(|s| s.state().is_active())
            {
                return Err(ScanError::AlreadyRunning);
            }
            let mut session = ScanSession::new(request.clone());
            session.begin();
            state.session = Some(session);
            state.cancel = Some(cancel.clone());
            state.scanned = 0;
        }

        let sweep = Sweep {
            shared: self.shared.clone(),
            observer,
            addr,
            total: request.port_count(),
            request,
            cancel,
            started: Instant::now(),
            scanned: 0,
            in_flight: HashMap::new(),
        };
        Ok(ScanHandle {
            task: tokio::spawn(sweep.run()),
            shared: self.shared.clone(),
        })
    }

    /// Start a scan and wait for it to reach a terminal state.
    pub async fn run(
        &self,
        request: ScanRequest,
        observer: Arc<dyn ScanObserver>,
    ) -> Result<ScanSession, ScanError> {
        self.start(request, observer).await?.wait().await
    }

    /// Ask the running scan to stop. Returns immediately; the terminal state is
    /// reported through the observer once in-flight probes drain.
    ///
    /// A no-op (returning `false`) when no scan is running.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.lock();
        let ControllerState {
            session, cancel, ..
        } = &mut *state;
        match (session.as_mut(), cancel.as_ref()) {
            (Some(session), Some(token)) => {
                if !session.request_cancel() {
                    return false;
                }
                token.cancel();
                info!(host = %session.request().host, "scan cancellation requested");
                true
            }
            _ => false,
        }
    }

    pub fn status(&self) -> ScanStatus {
        let state = self.shared.lock();
        match &state.session {
            None => ScanStatus::default(),
            Some(s) => ScanStatus {
                state: s.state(),
                host: Some(s.request().host.clone()),
                total: s.request().port_count(),
                scanned: state.scanned,
                open: s.open_ports().len() as u32,
                started_at: s.started_at(),
                finished_at: s.finished_at(),
            },
        }
    }

    /// Copy of the current (or last) session, including partial results mid-scan.
    pub fn session(&self) -> Option<ScanSession> {
        self.shared.lock().session.clone()
    }

    pub fn record(&self) -> Option<ScanRecord> {
        self.shared.lock().session.as_ref().map(ScanSession::to_record)
    }

    /// Advisory pre-scan check against the configured reachability port.
    pub async fn is_reachable(&self, host: &str) -> bool {
        let config = &self.shared.config;
        match netdetect::resolve_host(host).await {
            Ok(addr) => {
                probe::is_reachable(addr, config.reachability_port, config.reachability_timeout())
                    .await
            }
            Err(e) => {
                warn!(host, error = %e, "cannot resolve host for reachability check");
                false
            }
        }
    }
}

/// Handle to a scan launched with [`ScanController::start`].
///
/// Dropping it detaches the scan; it keeps running and is still visible through
/// the controller.
pub struct ScanHandle {
    task: JoinHandle<ScanSession>,
    shared: Arc<Shared>,
}

impl ScanHandle {
    /// Wait for the scan to reach `Completed` or `Cancelled` and return the session.
    pub async fn wait(self) -> Result<ScanSession, ScanError> {
        match self.task.await {
            Ok(session) => Ok(session),
            Err(e) => {
                // Never leave the controller stuck in an active state.
                let mut state = self.shared.lock();
                state.cancel = None;
                if let Some(session) = state.session.as_mut() {
                    session.finish();
                }
                Err(ScanError::TaskFailed(e))
            }
        }
    }
}

/// State owned by the background sweep. It is the only writer of the session.
struct Sweep {
    shared: Arc<Shared>,
    observer: Arc<dyn ScanObserver>,
    addr: IpAddr,
    request: ScanRequest,
    cancel: CancellationToken,
    started: Instant,
    total: u32,
    scanned: u32,
    in_flight: HashMap<task::Id, u16>,
}

impl Sweep {
    async fn run(mut self) -> ScanSession {
        self.log_info("Scan started".to_string());
        self.log_info(format!(
            "Scanning {} ({}) from port {} to {}",
            self.request.host, self.addr, self.request.start_port, self.request.end_port
        ));

        let sem = Arc::new(Semaphore::new(
            self.request.max_concurrent_probes.clamp(1, MAX_CONCURRENT_PROBES),
        ));
        let mut set: JoinSet<Option<ProbeOutcome>> = JoinSet::new();
        let cancel = self.cancel.clone();

        'dispatch: for port in self.request.ports() {
            // Fold finished probes while waiting for a free slot.
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'dispatch,
                    Some(joined) = set.join_next_with_id(), if !set.is_empty() => self.fold(joined),
                    acquired = sem.clone().acquire_owned() => match acquired {
                        Ok(permit) => break permit,
                        Err(_) => break 'dispatch,
                    },
                }
            };

            self.with_session(|s| s.mark_dispatched(port));
            let cancel = cancel.clone();
            let addr = self.addr;
            let timeout = self.request.per_port_timeout;
            let prober = self.shared.prober.clone();
            let handle = set.spawn(async move {
                let _permit = permit; // keep permit until the probe completes

                if cancel.is_cancelled() {
                    return None;
                }
                Some(prober.probe(addr, port, timeout).await)
            });
            self.in_flight.insert(handle.id(), port);
        }

        while let Some(joined) = set.join_next_with_id().await {
            self.fold(joined);
        }

        self.finish()
    }

    fn fold(&mut self, joined: Result<(task::Id, Option<ProbeOutcome>), JoinError>) {
        let (port, outcome) = match joined {
            Ok((id, outcome)) => (self.in_flight.remove(&id), outcome),
            Err(e) => (
                self.in_flight.remove(&e.id()),
                Some(ProbeOutcome::Error(format!("probe task failed: {e}"))),
            ),
        };
        let Some(port) = port else {
            warn!("joined a probe task that was never dispatched");
            return;
        };
        let Some(outcome) = outcome else {
            debug!(port, "probe skipped after cancellation");
            return;
        };

        self.scanned += 1;
        match outcome {
            ProbeOutcome::Open(service) => self.port_opened(port, service),
            ProbeOutcome::ClosedOrFiltered => {}
            ProbeOutcome::Error(reason) => {
                self.log_warn(format!(
                    "Error occurred while scanning port {port}: {reason}"
                ));
                self.observer.on_probe_error(port, &reason);
            }
        }

        let snapshot = progress::snapshot(self.total, self.scanned, self.started.elapsed());
        self.shared.lock().scanned = self.scanned;
        self.observer.on_progress(&snapshot);
    }

    fn port_opened(&self, port: u16, service: String) {
        let result = PortResult::new(port, service);
        let accepted = self
            .with_session(|s| s.push_open(result.clone()))
            .unwrap_or(false);
        if !accepted {
            debug!(port, "discarded open port outside the active session");
            return;
        }
        self.log_info(format!("Port {} ({}) is open", result.port, result.service));
        self.observer.on_port_opened(&result);
        self.cue(Cue::PortDiscovered);
    }

    fn finish(self) -> ScanSession {
        let duration = self.started.elapsed();
        let was_cancelled = self.cancel.is_cancelled();
        if was_cancelled {
            self.log_info("Scan cancelled".to_string());
        } else {
            self.log_info("Scan completed".to_string());
        }
        self.log_info(format!(
            "Scan duration: {:.2} seconds",
            duration.as_secs_f64()
        ));

        let session = {
            let mut state = self.shared.lock();
            state.cancel = None;
            state.session.as_mut().map(|s| {
                s.finish();
                s.clone()
            })
        };
        let session = session.unwrap_or_else(|| ScanSession::new(self.request.clone()));

        self.observer
            .on_scan_finished(duration, session.open_ports(), was_cancelled);
        if !was_cancelled {
            self.cue(Cue::ScanCompleted);
        }
        session
    }

    fn cue(&self, cue: Cue) {
        if let Err(e) = self.observer.on_cue(cue) {
            warn!(?cue, error = %e, "cue request failed");
        }
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut ScanSession) -> R) -> Option<R> {
        self.shared.lock().session.as_mut().map(f)
    }

    fn log_info(&self, message: String) {
        info!(host = %self.request.host, "{message}");
        self.record_log(message);
    }

    fn log_warn(&self, message: String) {
        warn!(host = %self.request.host, "{message}");
        self.record_log(message);
    }

    fn record_log(&self, message: String) {
        let timestamp = clock::now();
        self.observer.on_log(timestamp, &message);
        self.with_session(|s| s.push_log(LogEntry { timestamp, message }));
    }
}
