use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use port_scan_rs::config::ScanConfig;
use port_scan_rs::error::ScanError;
use port_scan_rs::observer::{Cue, ScanObserver};
use port_scan_rs::probe::{ProbeFuture, ProbeOutcome, Prober};
use port_scan_rs::progress::ProgressSnapshot;
use port_scan_rs::scanner::ScanController;
use port_scan_rs::types::{PortResult, ScanRequest, ScanState};
use time::OffsetDateTime;
use tokio::net::TcpListener;

#[derive(Default)]
struct Recorder {
    progress: Mutex<Vec<ProgressSnapshot>>,
    opened: Mutex<Vec<u16>>,
    errors: Mutex<Vec<(u16, String)>>,
    finished: Mutex<Vec<(usize, bool)>>,
    cues: Mutex<Vec<Cue>>,
    logs: Mutex<Vec<String>>,
    fail_cues: bool,
}

impl ScanObserver for Recorder {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.progress.lock().unwrap().push(*snapshot);
    }

    fn on_port_opened(&self, result: &PortResult) {
        self.opened.lock().unwrap().push(result.port);
    }

    fn on_probe_error(&self, port: u16, reason: &str) {
        self.errors.lock().unwrap().push((port, reason.to_string()));
    }

    fn on_scan_finished(&self, _duration: Duration, open_ports: &[PortResult], was_cancelled: bool) {
        self.finished
            .lock()
            .unwrap()
            .push((open_ports.len(), was_cancelled));
    }

    fn on_log(&self, _timestamp: OffsetDateTime, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }

    fn on_cue(&self, cue: Cue) -> anyhow::Result<()> {
        self.cues.lock().unwrap().push(cue);
        if self.fail_cues {
            anyhow::bail!("no audio device");
        }
        Ok(())
    }
}

fn config(concurrency: usize) -> ScanConfig {
    ScanConfig {
        timeout_ms: 200,
        concurrency,
        ..ScanConfig::default()
    }
}

/// Canned outcomes per port: 3 runs out of descriptors, 5 is open, 7 panics.
struct ScriptedProber;

impl Prober for ScriptedProber {
    fn probe(&self, _addr: IpAddr, port: u16, _timeout: Duration) -> ProbeFuture {
        Box::pin(async move {
            match port {
                3 => ProbeOutcome::Error("Too many open files (os error 24)".into()),
                5 => ProbeOutcome::Open("smtp".into()),
                7 => panic!("connect blew up"),
                _ => ProbeOutcome::ClosedOrFiltered,
            }
        })
    }
}

/// Bind an ephemeral listener that keeps accepting until the test ends.
async fn open_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while listener.accept().await.is_ok() {}
    });
    port
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_listener_reports_one_open_port() {
    let port = open_port().await;
    let cfg = config(16);
    let controller = ScanController::new(cfg.clone());
    let rec = Arc::new(Recorder::default());

    let session = controller
        .run(ScanRequest::new("127.0.0.1", port, port, &cfg), rec.clone())
        .await
        .expect("scan runs");

    assert_eq!(session.state(), ScanState::Completed);
    assert_eq!(*rec.opened.lock().unwrap(), vec![port]);
    assert_eq!(*rec.finished.lock().unwrap(), vec![(1, false)]);
    assert_eq!(
        *rec.cues.lock().unwrap(),
        vec![Cue::PortDiscovered, Cue::ScanCompleted]
    );
    assert!(session.finished_at().is_some());

    let record = session.to_record();
    assert_eq!(record.ip, "127.0.0.1");
    assert_eq!((record.start_port, record.end_port), (port, port));
    assert_eq!(record.open_ports.len(), 1);
    assert!(record.logs.contains(&format!("Port {port} (")));
    assert!(record.logs.contains("Scan completed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn progress_ticks_once_per_port_and_reaches_full() {
    let port = open_port().await;
    let start = port.saturating_sub(16).max(1);
    let end = start.saturating_add(31);
    let cfg = config(8);
    let controller = ScanController::new(cfg.clone());
    let rec = Arc::new(Recorder::default());

    let session = controller
        .run(ScanRequest::new("127.0.0.1", start, end, &cfg), rec.clone())
        .await
        .unwrap();

    let total = u32::from(end) - u32::from(start) + 1;
    let ticks = rec.progress.lock().unwrap().clone();
    assert_eq!(ticks.len() as u32, total);
    assert!(ticks.windows(2).all(|w| w[0].scanned < w[1].scanned));
    let last = ticks.last().unwrap();
    assert_eq!(last.percent(), 100.0);
    assert!(last.is_complete());
    assert_eq!(last.estimated_remaining, Duration::ZERO);

    let ports: Vec<u16> = session.open_ports().iter().map(|r| r.port).collect();
    assert!(ports.contains(&port));
    let unique: HashSet<u16> = ports.iter().copied().collect();
    assert_eq!(unique.len(), ports.len());
    assert!(ports.iter().all(|p| (start..=end).contains(p)));

    let status = controller.status();
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!((status.scanned, status.total), (total, total));
}

#[tokio::test]
async fn inverted_range_fails_and_stays_idle() {
    let cfg = config(4);
    let controller = ScanController::new(cfg.clone());
    let err = controller
        .start(
            ScanRequest::new("127.0.0.1", 1024, 1, &cfg),
            Arc::new(Recorder::default()),
        )
        .await
        .err()
        .expect("inverted range must fail");

    assert!(matches!(err, ScanError::InvalidRange { start: 1024, end: 1 }));
    assert_eq!(controller.status().state, ScanState::Idle);
    assert!(controller.session().is_none());
}

#[tokio::test]
async fn unresolvable_host_fails_without_state_change() {
    let cfg = config(4);
    let controller = ScanController::new(cfg.clone());
    let err = controller
        .start(
            ScanRequest::new("no-such-host.invalid", 1, 10, &cfg),
            Arc::new(Recorder::default()),
        )
        .await
        .err()
        .expect("resolution must fail");

    assert!(matches!(err, ScanError::Resolve { .. }));
    assert_eq!(controller.status().state, ScanState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_start_while_running_is_rejected() {
    let cfg = config(4);
    let controller = ScanController::new(cfg.clone());
    let handle = controller
        .start(
            ScanRequest::new("127.0.0.1", 1, u16::MAX, &cfg),
            Arc::new(Recorder::default()),
        )
        .await
        .unwrap();

    let second = controller
        .start(
            ScanRequest::new("127.0.0.1", 1, 10, &cfg),
            Arc::new(Recorder::default()),
        )
        .await;
    assert!(matches!(second, Err(ScanError::AlreadyRunning)));
    assert_eq!(controller.status().host.as_deref(), Some("127.0.0.1"));
    assert_eq!(controller.status().total, u32::from(u16::MAX));

    assert!(controller.cancel());
    let session = handle.wait().await.unwrap();
    assert_eq!(session.state(), ScanState::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn immediate_cancel_stops_full_range_early() {
    let cfg = config(50);
    let controller = ScanController::new(cfg.clone());
    let rec = Arc::new(Recorder::default());
    let handle = controller
        .start(ScanRequest::new("127.0.0.1", 1, u16::MAX, &cfg), rec.clone())
        .await
        .unwrap();

    assert!(controller.cancel());
    let session = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("cancelled scan terminates promptly")
        .unwrap();

    assert_eq!(session.state(), ScanState::Cancelled);
    assert_eq!(controller.status().state, ScanState::Cancelled);
    let scanned = rec.progress.lock().unwrap().len();
    assert!(scanned < usize::from(u16::MAX));
    assert_eq!(*rec.finished.lock().unwrap(), vec![(session.open_ports().len(), true)]);
    assert!(!rec.cues.lock().unwrap().contains(&Cue::ScanCompleted));

    let last = session.last_dispatched().unwrap_or(1);
    assert!(session.open_ports().iter().all(|r| r.port <= last));
    assert_eq!(session.to_record().end_port, last);
    assert!(rec.logs.lock().unwrap().iter().any(|l| l == "Scan cancelled"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_outside_running_is_a_noop() {
    let port = open_port().await;
    let cfg = config(4);
    let controller = ScanController::new(cfg.clone());
    assert!(!controller.cancel());
    assert_eq!(controller.status().state, ScanState::Idle);

    controller
        .run(
            ScanRequest::new("127.0.0.1", port, port, &cfg),
            Arc::new(Recorder::default()),
        )
        .await
        .unwrap();
    assert!(!controller.cancel());
    assert_eq!(controller.status().state, ScanState::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_is_idempotent() {
    let port = open_port().await;
    let cfg = config(4);
    let controller = ScanController::new(cfg.clone());
    assert_eq!(controller.status(), controller.status());

    controller
        .run(
            ScanRequest::new("127.0.0.1", port, port, &cfg),
            Arc::new(Recorder::default()),
        )
        .await
        .unwrap();
    let first = controller.status();
    for _ in 0..5 {
        assert_eq!(controller.status(), first);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn new_scan_may_start_after_terminal_state() {
    let port = open_port().await;
    let cfg = config(4);
    let controller = ScanController::new(cfg.clone());
    for _ in 0..2 {
        let session = controller
            .run(
                ScanRequest::new("127.0.0.1", port, port, &cfg),
                Arc::new(Recorder::default()),
            )
            .await
            .unwrap();
        assert_eq!(session.state(), ScanState::Completed);
        assert_eq!(session.open_ports().len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_cues_do_not_affect_the_scan() {
    let port = open_port().await;
    let cfg = config(4);
    let controller = ScanController::new(cfg.clone());
    let rec = Arc::new(Recorder {
        fail_cues: true,
        ..Recorder::default()
    });

    let session = controller
        .run(ScanRequest::new("127.0.0.1", port, port, &cfg), rec.clone())
        .await
        .unwrap();

    assert_eq!(session.state(), ScanState::Completed);
    assert_eq!(session.open_ports().len(), 1);
    assert_eq!(rec.cues.lock().unwrap().len(), 2);
    assert!(rec.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reachability_uses_configured_port() {
    let port = open_port().await;
    let controller = ScanController::new(ScanConfig {
        reachability_port: port,
        ..ScanConfig::default()
    });
    assert!(controller.is_reachable("127.0.0.1").await);
    assert!(!controller.is_reachable("no-such-host.invalid").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn port_errors_are_reported_and_the_scan_completes() {
    let cfg = config(4);
    let controller = ScanController::with_prober(cfg.clone(), Arc::new(ScriptedProber));
    let rec = Arc::new(Recorder::default());

    let session = controller
        .run(ScanRequest::new("127.0.0.1", 1, 10, &cfg), rec.clone())
        .await
        .unwrap();

    assert_eq!(session.state(), ScanState::Completed);
    let mut errors = rec.errors.lock().unwrap().clone();
    errors.sort();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0], (3, "Too many open files (os error 24)".to_string()));
    assert_eq!(errors[1].0, 7);
    assert!(errors[1].1.starts_with("probe task failed"));

    assert_eq!(rec.progress.lock().unwrap().len(), 10);
    assert_eq!(controller.status().scanned, 10);
    assert_eq!(*rec.opened.lock().unwrap(), vec![5]);
    assert_eq!(*rec.finished.lock().unwrap(), vec![(1, false)]);
    assert!(rec.cues.lock().unwrap().contains(&Cue::ScanCompleted));

    let messages: Vec<&str> = session.logs().iter().map(|l| l.message.as_str()).collect();
    assert!(messages.contains(
        &"Error occurred while scanning port 3: Too many open files (os error 24)"
    ));
    assert!(messages
        .iter()
        .any(|m| m.starts_with("Error occurred while scanning port 7:")));
    assert!(messages.contains(&"Scan completed"));
}
