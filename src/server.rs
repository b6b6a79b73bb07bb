use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    error::ScanError,
    observer::TracingObserver,
    scanner::ScanController,
    types::ScanRequest,
};

#[derive(Clone)]
pub struct AppState {
    controller: ScanController,
}

/// Body of `POST /api/scan`. Omitted tuning fields fall back to the controller's config.
#[derive(Debug, Deserialize)]
pub struct StartScanBody {
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Routes under `/api` driving one shared controller.
pub fn router(controller: ScanController) -> Router {
    let state = AppState { controller };

    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/cancel", post(post_cancel))
        .route("/results", get(get_results))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `bind` until `shutdown` resolves. A running scan is cancelled on the way out.
pub async fn spawn_server(
    bind: &str,
    controller: ScanController,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(controller.clone());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving scan API on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    controller.cancel();
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.controller.status()))
}

async fn get_results(State(app): State<AppState>) -> Response {
    match app.controller.record() {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    // Stop clicks racing scan completion are fine; cancelling an idle scanner is a no-op.
    app.controller.cancel();
    (StatusCode::ACCEPTED, Json(app.controller.status()))
}

async fn post_scan(State(app): State<AppState>, Json(body): Json<StartScanBody>) -> Response {
    let config = app.controller.config();
    let mut request = ScanRequest::new(body.host, body.start_port, body.end_port, config);
    if let Some(c) = body.concurrency {
        request.max_concurrent_probes = c;
    }
    if let Some(ms) = body.timeout_ms {
        request.per_port_timeout = Duration::from_millis(ms);
    }

    match app.controller.start(request, Arc::new(TracingObserver)).await {
        // Dropping the handle detaches the scan; progress is polled via /status.
        Ok(_handle) => (StatusCode::ACCEPTED, Json(app.controller.status())).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: ScanError) -> Response {
    let code = match e {
        ScanError::InvalidRange { .. } | ScanError::Resolve { .. } => StatusCode::BAD_REQUEST,
        ScanError::AlreadyRunning => StatusCode::CONFLICT,
        ScanError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(ErrorBody { error: e.to_string() })).into_response()
}
