use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{ConnectInfo, DefaultBodyLimit, State, rejection::JsonRejection},
    http::{Method, StatusCode, header},
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    constants::{MAX_BODY_BYTES, SERVICE_NAME},
    core::{admission::AdmissionController, queue::JobQueue},
    http::{
        mappers::ApiError,
        models::{
            CompileRequest, CompileResponse, Endpoints, HealthResponse, ServerInfo, ServiceInfo,
            StatsResponse,
        },
    },
};

#[derive(Clone, Debug)]
pub struct AppState {
    pub admission: Arc<AdmissionController>,
    pub queue: JobQueue,
    pub languages: Vec<String>,
    pub concurrency: usize,
    pub cpu_cores: usize,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/compile", post(compile))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tracing::instrument(skip(state, payload))]
async fn compile(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<CompileRequest>, JsonRejection>,
) -> Result<Json<CompileResponse>, ApiError> {
    // A body that doesn't parse is treated as one with every field missing.
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::info!("Request body from {} over the size limit", peer);
            return Err(ApiError::BodyTooLarge);
        }
        Err(rejection) => {
            tracing::debug!("Rejected body: {}", rejection.body_text());
            CompileRequest::default()
        }
    };

    let stdin = request.stdin();
    let job = state.admission.admit(
        &peer.ip().to_string(),
        request.code,
        request.language,
        stdin,
    )?;
    let job_id = job.id;

    let result = match state.queue.enqueue(job) {
        Ok(handle) => {
            tracing::debug!("Job {} queued for {}", handle.id(), peer);
            handle.wait().await
        }
        Err(e) => Err(e),
    }
    .map_err(|e| {
        tracing::error!("Queue Error for job {}: {}", job_id, e);
        ApiError::from(e)
    })?;

    Ok(Json(result.into()))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.queue.is_closed() {
        "unhealthy"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status,
        timestamp: chrono::Utc::now(),
        queue: state.queue.counts(),
        server: ServerInfo {
            concurrency: state.concurrency,
            cpu_cores: state.cpu_cores,
            uptime_secs: state.started_at.elapsed().as_secs_f64(),
        },
    })
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let counts = state.queue.counts();

    Json(StatsResponse {
        waiting_jobs: counts.waiting,
        active_jobs: counts.active,
        counts,
        concurrency: state.concurrency,
        rate_limit_entries: state.admission.tracked_clients(),
        failed_jobs: state.queue.failed_jobs(),
    })
}

async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
        languages: state.languages.clone(),
        endpoints: Endpoints::default(),
    })
}
