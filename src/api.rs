//! Health & operator API
//!
//! - GET /health - Pipeline health (503 once a pipeline has halted)
//! - GET /healthz - Liveness probe
//! - GET /metrics - Prometheus metrics
//! - GET /status - Per-chain checkpoint, safe head and ledger counts
//! - POST /retry/{id} - Re-open a failed ledger row for dispatch

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::db::models::StatusCounts;
use crate::ledger::BridgeLedger;
use crate::metrics;
use crate::types::BridgeStatus;
use crate::watchers::{PipelineStatus, SharedStatus};

#[derive(Clone)]
pub struct AppState {
    pub pipelines: Vec<SharedStatus>,
    pub ledger: Arc<dyn BridgeLedger>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pipelines: Vec<SharedStatus>, ledger: Arc<dyn BridgeLedger>) -> Self {
        Self {
            pipelines,
            ledger,
            started_at: Instant::now(),
        }
    }

    async fn snapshot(&self) -> Vec<PipelineStatus> {
        let mut out = Vec::with_capacity(self.pipelines.len());
        for pipeline in &self.pipelines {
            out.push(pipeline.read().await.clone());
        }
        out
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    halted: Vec<HaltedPipeline>,
}

#[derive(Serialize)]
struct HaltedPipeline {
    chain: String,
    reason: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: u64,
    pipelines: Vec<PipelineStatus>,
    /// `None` when the ledger could not be reached
    transactions: Option<StatusCounts>,
}

#[derive(Serialize)]
struct RetryResponse {
    id: i64,
    status: BridgeStatus,
    message: String,
}

async fn health(State(state): State<AppState>) -> Response {
    let halted: Vec<HaltedPipeline> = state
        .snapshot()
        .await
        .into_iter()
        .filter_map(|p| {
            p.halted.map(|reason| HaltedPipeline {
                chain: p.chain.to_string(),
                reason,
            })
        })
        .collect();

    if halted.is_empty() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                halted,
            }),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "halted",
                halted,
            }),
        )
            .into_response()
    }
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let pipelines = state.snapshot().await;
    let transactions = match state.ledger.count_by_status().await {
        Ok(counts) => Some(counts),
        Err(e) => {
            warn!(error = %e, "Failed to count ledger rows");
            None
        }
    };

    Json(StatusResponse {
        status: if pipelines.iter().all(|p| p.is_healthy()) {
            "ok"
        } else {
            "halted"
        },
        uptime_seconds: state.started_at.elapsed().as_secs(),
        pipelines,
        transactions,
    })
}

async fn retry(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.ledger.requeue(id).await {
        Ok(true) => {
            info!(id, "Ledger row requeued by operator");
            (
                StatusCode::ACCEPTED,
                Json(RetryResponse {
                    id,
                    status: BridgeStatus::Initiated,
                    message: "requeued; the next sweep will re-dispatch it".to_string(),
                }),
            )
                .into_response()
        }
        Ok(false) => match state.ledger.get(id).await {
            Ok(Some(row)) => (
                StatusCode::CONFLICT,
                Json(RetryResponse {
                    id,
                    status: row.status,
                    message: "only failed rows can be retried".to_string(),
                }),
            )
                .into_response(),
            Ok(None) => (StatusCode::NOT_FOUND, "no such bridge transaction").into_response(),
            Err(e) => internal_error(e),
        },
        Err(e) => internal_error(e),
    }
}

fn internal_error(e: eyre::Report) -> Response {
    warn!(error = %e, "API request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(liveness))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .route("/retry/{id}", post(retry))
        .with_state(state)
}

/// Start the API server
pub async fn start_api_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "API server started");
    metrics::UP.set(1.0);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
