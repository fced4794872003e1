use crate::api::{AnalyzeRequest, AnalyzeService};
use crate::error::TrustLayerError;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json as ResponseJson,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::error;

/// Header carrying the caller's shared secret
pub const API_KEY_HEADER: &str = "x-api-key";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Orchestration service behind every endpoint
    pub service: Arc<AnalyzeService>,
}

type ErrorReply = (StatusCode, ResponseJson<Value>);

/// Builds the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let pdf_dir = state.service.config().output_dir.clone();
    Router::new()
        .route("/health", get(health_check))
        .route("/analyze", post(analyze))
        .route("/attachments/:issue_key", get(attachment_status))
        .nest_service("/pdfs", ServeDir::new(pdf_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> ResponseJson<Value> {
    ResponseJson(json!({
        "service": "trust-layer",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "healthy",
        "timestamp": Utc::now(),
    }))
}

/// `POST /analyze` — the main analysis flow
async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Result<ResponseJson<Value>, ErrorReply> {
    let config = state.service.config();

    // Provider credential first, shared secret second, per the documented
    // request order.
    if config.gemini_api_key().is_err() {
        error!("provider credential missing, refusing request");
        return Err(error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server misconfiguration",
        ));
    }

    let supplied = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if supplied != Some(config.shared_secret.as_str()) {
        return Err(error_reply(StatusCode::FORBIDDEN, "Unauthorized"));
    }

    match state.service.analyze(request).await {
        Ok(response) => Ok(ResponseJson(json!(response))),
        Err(e) => {
            // Detailed diagnostics stay server-side; the caller gets a short
            // message.
            error!(error = %e, "analysis request failed");
            Err(map_error(&e))
        }
    }
}

/// `GET /attachments/:issue_key` — poll a background upload's outcome
async fn attachment_status(
    State(state): State<AppState>,
    Path(issue_key): Path<String>,
) -> Result<ResponseJson<Value>, ErrorReply> {
    match state.service.attachments().get(&issue_key).await {
        Some(status) => Ok(ResponseJson(json!(status))),
        None => Err(error_reply(StatusCode::NOT_FOUND, "Unknown issue key")),
    }
}

fn map_error(e: &TrustLayerError) -> ErrorReply {
    match e {
        TrustLayerError::Config(_) => error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server misconfiguration",
        ),
        TrustLayerError::Provider { .. } | TrustLayerError::MalformedResponse(_) => {
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "AI request failed")
        }
        TrustLayerError::FileNotFound(_) => {
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Attachment upload failed")
        }
        e if e.is_upload_failure() => {
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Attachment upload failed")
        }
        _ => error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
    }
}

fn error_reply(status: StatusCode, message: &str) -> ErrorReply {
    (status, ResponseJson(json!({ "error": message })))
}
