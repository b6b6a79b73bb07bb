use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use port_scan_rs::config::ScanConfig;
use port_scan_rs::observer::{Cue, ScanObserver};
use port_scan_rs::progress::ProgressSnapshot;
use port_scan_rs::scanner::ScanController;
use port_scan_rs::session::ScanSession;
use port_scan_rs::types::{PortResult, ScanRequest};
use port_scan_rs::{clock, netdetect, ports, report, server};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use time::UtcOffset;
use tracing_subscriber::EnvFilter;

/// port-scan-rs — cancelable async TCP connect port scanner.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "port-scan-rs",
    version,
    about = "Cancelable async TCP connect port scanner with progress and ETA reporting.",
    long_about = None
)]
struct Cli {
    /// Target host name or IP. If omitted, the local IPv4 address is scanned.
    #[arg(long)]
    host: Option<String>,

    /// Port or inclusive port range, e.g. `22` or `1-1024`. Defaults to the config range.
    #[arg(long)]
    ports: Option<String>,

    /// JSON config file; flags given on the command line override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Max concurrent TCP connect attempts.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-port connect timeout in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Timeout of the reachability pre-check in milliseconds.
    #[arg(long = "reachability-timeout-ms")]
    reachability_timeout_ms: Option<u64>,

    /// Scan even if the reachability pre-check fails.
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Write the result record to this path: `.txt` for the text report, JSON otherwise.
    /// A directory gets a generated file name.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Ring the terminal bell on discovered ports and on completion.
    #[arg(long, default_value_t = false)]
    bell: bool,

    /// Serve the HTTP scan API on this address instead of running a single scan.
    #[arg(long)]
    serve: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Must run while the process is still single-threaded.
    let local_offset = clock::init_local_offset();
    if local_offset.is_none() {
        warn!("local UTC offset unavailable; timestamps are in UTC");
    }

    let cli = Cli::parse();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?
        .block_on(run(cli, local_offset))
}

async fn run(cli: Cli, local_offset: Option<UtcOffset>) -> Result<()> {
    let config = load_config(&cli)?;

    if let Some(bind) = cli.serve.as_deref() {
        let controller = ScanController::new(config);
        println!("Scan API at http://{}/api (Ctrl+C to stop)", bind);
        return server::spawn_server(bind, controller, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    }

    let host = match cli.host.clone() {
        Some(h) => h,
        None => default_host(&config),
    };
    let (start_port, end_port) = match cli.ports.as_deref() {
        Some(p) => ports::parse_port_range(p)?,
        None => (config.default_start_port, config.default_end_port),
    };

    println!("port-scan-rs configuration:");
    println!("  host         : {}", host);
    println!("  ports        : {}-{}", start_port, end_port);
    println!("  concurrency  : {}", config.concurrency);
    println!("  timeout_ms   : {}", config.timeout_ms);
    println!(
        "  timestamps   : {}",
        local_offset
            .map(|o| format!("local (UTC{o})"))
            .unwrap_or_else(|| "UTC".to_string())
    );
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );

    let controller = ScanController::new(config.clone());

    if !controller.is_reachable(&host).await {
        if !cli.force {
            bail!(
                "{host} did not answer on port {} within {}ms; re-run with --force to scan anyway",
                config.reachability_port,
                config.reachability_timeout_ms
            );
        }
        warn!(%host, "host looks unreachable, scanning anyway (--force)");
    }

    let request = ScanRequest::new(host, start_port, end_port, &config);
    let observer = Arc::new(ConsoleObserver::new(cli.bell));
    let handle = controller.start(request, observer).await?;

    // Ctrl-C cancels the scan; in-flight probes still drain.
    let ctrlc = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc.cancel();
        }
    });

    let session = handle.wait().await?;
    print_results_table(&session);

    if let Some(path) = cli.output.as_deref() {
        match write_results(path, &session) {
            Ok(written) => println!("Wrote results to {}", written.display()),
            Err(e) => eprintln!("Failed to write results to {}: {:#}", path.display(), e),
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<ScanConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => ScanConfig::load(path)?,
        None => ScanConfig::default(),
    };
    if let Some(c) = cli.concurrency {
        config.concurrency = c;
    }
    if let Some(ms) = cli.timeout_ms {
        config.timeout_ms = ms;
    }
    if let Some(ms) = cli.reachability_timeout_ms {
        config.reachability_timeout_ms = ms;
    }
    Ok(config)
}

fn default_host(config: &ScanConfig) -> String {
    match netdetect::detect_local_ip() {
        Ok(Some(ip)) => ip.to_string(),
        Ok(None) => config.default_host.clone(),
        Err(e) => {
            warn!(error = %e, "failed to detect local address");
            config.default_host.clone()
        }
    }
}

/// Prints progress roughly once per percent, lists ports as they open.
struct ConsoleObserver {
    bell: bool,
    last_percent: AtomicU64,
}

impl ConsoleObserver {
    fn new(bell: bool) -> Self {
        Self {
            bell,
            last_percent: AtomicU64::new(u64::MAX),
        }
    }
}

impl ScanObserver for ConsoleObserver {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let pct = snapshot.percent().floor() as u64;
        if self.last_percent.swap(pct, Ordering::Relaxed) != pct {
            println!("[{:>6.2}%] {}", snapshot.percent(), snapshot);
        }
    }

    fn on_port_opened(&self, result: &PortResult) {
        println!("  open  {:>5}/tcp  {}", result.port, result.service);
    }

    fn on_probe_error(&self, port: u16, reason: &str) {
        eprintln!("  error {:>5}/tcp  {}", port, reason);
    }

    fn on_scan_finished(&self, duration: Duration, open_ports: &[PortResult], was_cancelled: bool) {
        let verb = if was_cancelled { "cancelled" } else { "completed" };
        info!(
            open = open_ports.len(),
            "scan {} in {:.2}s",
            verb,
            duration.as_secs_f64()
        );
    }

    fn on_cue(&self, _cue: Cue) -> Result<()> {
        if self.bell {
            let mut err = std::io::stderr();
            err.write_all(b"\x07")?;
            err.flush()?;
        }
        Ok(())
    }
}

fn print_results_table(session: &ScanSession) {
    let open = session.open_ports();
    let service_w = open
        .iter()
        .map(|r| r.service.len())
        .max()
        .unwrap_or(0)
        .max("service".len());
    let port_w = 5usize.max("port".len());

    println!(
        "\nOpen ports on {}: {} (state: {:?}, duration: {:.2}s)",
        session.request().host,
        open.len(),
        session.state(),
        session.duration().unwrap_or_default().as_secs_f64()
    );
    println!(
        "{:>port_w$}  {:<service_w$}  {}",
        "port",
        "service",
        "discovered",
        port_w = port_w,
        service_w = service_w
    );
    println!(
        "{:-<port_w$}  {:-<service_w$}  {:-<19}",
        "",
        "",
        "",
        port_w = port_w,
        service_w = service_w
    );
    for r in open {
        println!(
            "{:>port_w$}  {:<service_w$}  {}",
            r.port,
            r.service,
            clock::format_log_time(r.timestamp),
            port_w = port_w,
            service_w = service_w
        );
    }
}

fn write_results(path: &Path, session: &ScanSession) -> Result<PathBuf> {
    let record = session.to_record();
    let is_text = |p: &Path| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("txt"));

    let target = if path.is_dir() {
        path.join(report::default_file_name(&record, "json"))
    } else {
        path.to_path_buf()
    };
    let body = if is_text(&target) {
        report::to_text(&record, session.state())
    } else {
        report::to_json(&record)?
    };
    std::fs::write(&target, body)
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}
