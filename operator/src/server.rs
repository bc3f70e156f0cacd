// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use tracing::{error, info};

pub const HEALTH_PATH: &str = "/health";
pub const PING_PATH: &str = "/ping";
pub const METRICS_PATH: &str = "/metrics";

// Public metadata served on `/ping`. Keep it free of anything sensitive.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OperatorPublicMetadata {
    pub version: &'static str,
    pub operator_address: String,
    pub chains: Vec<u64>,
}

#[derive(Clone)]
struct ServerState {
    registry: Registry,
    metadata: OperatorPublicMetadata,
}

/// Binds `socket_address` and serves health and metrics in the background.
pub async fn run_server(
    socket_address: &SocketAddr,
    registry: Registry,
    metadata: OperatorPublicMetadata,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(socket_address).await?;
    info!("Metrics server listening on {}", listener.local_addr()?);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            make_router(registry, metadata).into_make_service(),
        )
        .await
        {
            error!("Metrics server stopped: {:?}", e);
        }
    }))
}

fn make_router(registry: Registry, metadata: OperatorPublicMetadata) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route(HEALTH_PATH, get(health_check))
        .route(PING_PATH, get(ping))
        .route(METRICS_PATH, get(metrics))
        .with_state(ServerState { registry, metadata })
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn ping(State(state): State<ServerState>) -> Json<OperatorPublicMetadata> {
    Json(state.metadata)
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&state.registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            String::from_utf8_lossy(&buffer).into_owned(),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain".to_string())],
            format!("Failed to encode metrics: {:?}", e),
        ),
    }
}
