//! Read-only HTTP view of broker state.

use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::scheduler::{Dispatcher, JobType};

#[derive(Clone)]
pub struct DashboardState {
    pub dispatcher: Dispatcher,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/workers", get(list_workers_handler))
        .route("/api/jobs", get(list_queue_jobs_handler))
        .route("/api/jobs/:id", get(get_job_handler))
        .route("/api/executions", get(list_executions_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn list_workers_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.dispatcher.list_workers().await)
}

async fn list_queue_jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.dispatcher.list_jobs(JobType::Queue).await)
}

async fn list_executions_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.dispatcher.list_jobs(JobType::Exe).await)
}

async fn get_job_handler(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let job = match Uuid::parse_str(&id) {
        Ok(uuid) => state.dispatcher.get_job(&uuid).await,
        Err(_) => None,
    };

    match job {
        Some(job) => Json(job).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Job not found with ID {}", id),
            }),
        )
            .into_response(),
    }
}
