mod catalog;
mod config;
mod http;
mod images;
mod jobs;
mod metrics;
mod models;
mod pipeline;
mod retry;
mod shopify;
mod warehouse;

#[cfg(test)]
mod testing;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::ExportConfig;
use eyre::WrapErr;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, ExportReport, ExportRequest};
use pipeline::{Exporter, PipelineError, PipelineErrorKind};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "export.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = load_config()?;
    let exporter = Exporter::from_config(&config).wrap_err("building exporter")?;
    let (queue, _worker) = jobs::JobQueue::spawn(exporter.clone());
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        exporter,
        queue,
        prometheus_handle,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/exports", post(run_export))
        .nest(
            "/jobs",
            Router::new()
                .route("/exports", post(enqueue_export_job))
                .route("/{id}", get(get_job_status)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "export.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// `EXPORT_CONFIG` names a YAML file; without it everything comes from the
/// environment.
fn load_config() -> eyre::Result<ExportConfig> {
    let config = match std::env::var("EXPORT_CONFIG") {
        Ok(path) if !path.trim().is_empty() => ExportConfig::from_yaml_file(path.trim())?,
        _ => ExportConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

#[derive(Clone)]
struct AppState {
    exporter: Exporter,
    queue: jobs::JobQueue,
    prometheus_handle: PrometheusHandle,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
///
/// Returns a small JSON payload with `status` and `service`.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "catalog-export",
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Export a batch of product groups and wait for the report.
///
/// - Method: `POST`
/// - Path: `/exports`
/// - Body: `ExportRequest` (`group_ids`, `all`, `dry_run`)
/// - Response: `ExportReport`; failed groups are reported inside it, so the
///   status is only non-200 when the request itself is unusable.
async fn run_export(
    State(state): State<AppState>,
    Json(payload): Json<ExportRequest>,
) -> Result<Json<ExportReport>, AppError> {
    crate::metrics::inc_requests("/exports");
    info!(
        target = "export.api",
        groups = payload.group_ids.len(),
        all = payload.all,
        dry_run = payload.dry_run,
        "export requested"
    );
    let report = state.exporter.run(payload).await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_export_job(
    State(state): State<AppState>,
    Json(payload): Json<ExportRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/exports");
    let id = state
        .queue
        .enqueue(payload)
        .await
        .map_err(|err| AppError::Pipeline(PipelineError::internal("enqueue", err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Pipeline(PipelineError::validation(
            "jobs",
            "invalid_job_id",
        )));
    };
    match state.queue.get(uuid).await {
        Some(info) => Ok(Json(info)),
        None => Err(AppError::Pipeline(PipelineError::not_found(
            "jobs",
            "job_not_found",
        ))),
    }
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::Validation => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::NotFound => StatusCode::NOT_FOUND,
                    PipelineErrorKind::Remote => StatusCode::BAD_GATEWAY,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
