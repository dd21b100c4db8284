//! HTTP surface: health probe, chat endpoint, and the static frontend.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info};

use crate::error::fingerprint;
use crate::pipeline::Pipeline;

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "Pulse AI";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Wraps a ready pipeline.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

/// `POST /chat` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// Free-text symptom description.
    pub message: String,
}

/// `POST /chat` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatResponse {
    /// Generated answer or fixed advisory message.
    pub response: String,
}

/// `GET /health` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
}

/// Error body for 4xx/5xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Human-readable failure description.
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

/// Builds the application router. `frontend_dir` must contain `index.html`.
pub fn router(state: AppState, frontend_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route_service("/", ServeFile::new(frontend_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(frontend_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves `app` until Ctrl-C.
pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown requested");
}

/// Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
    })
}

/// Runs the pipeline on a blocking worker and returns its message.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err(bad_request("Message cannot be empty."));
    }
    let started = Instant::now();
    let input_id = fingerprint(&message);
    let pipeline = state.pipeline.clone();
    let response = tokio::task::spawn_blocking(move || pipeline.answer(&message))
        .await
        .map_err(|err| internal_error(format!("worker join error: {err}")))?
        .map_err(|err| internal_error(err.to_string()))?;
    info!(
        %input_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "chat answered"
    );
    Ok(Json(ChatResponse { response }))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            detail: message.into(),
        }),
    )
}

fn internal_error(reason: String) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            detail: format!("Pipeline error: {reason}"),
        }),
    )
}
