use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::error::EvidenceError;
use crate::pipeline::{EvidencePipeline, EvidenceReceipt};

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<EvidencePipeline>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/healthcheck",
            get(|| async move { (StatusCode::OK, "Ok").into_response() })
                .fallback(method_not_allowed),
        )
        .route(
            "/api/evidence",
            post(record_evidence).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(host: String, port: u16, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;
    tracing::info!(addr = %listener.local_addr()?, "evidence service listening");

    axum::serve(listener, router(state))
        .await
        .context("serving HTTP")?;

    Ok(())
}

async fn record_evidence(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<EvidenceReceipt>, EvidenceError> {
    let body = body.map_err(|rejection| match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => EvidenceError::PayloadTooLarge(MAX_BODY_BYTES),
        _ => EvidenceError::InvalidJson,
    })?;
    let payload: Value = serde_json::from_slice(&body).map_err(|_| EvidenceError::InvalidJson)?;
    let receipt = state.pipeline.record(payload).await?;
    Ok(Json(receipt))
}

async fn not_found(uri: Uri) -> EvidenceError {
    EvidenceError::NotFound(uri.path().to_string())
}

async fn method_not_allowed(method: Method) -> EvidenceError {
    EvidenceError::MethodNotAllowed(method.to_string())
}
