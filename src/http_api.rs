//! Optional observability endpoint (`/health`, `/stats`), off by default.
//! Reads from the same connection/request counters the dispatch loop
//! updates; never the reverse.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tracing::info;

use crate::connection::ConnectionStats;
use crate::handler::RequestHandler;
use crate::server::Server;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    running: bool,
    transport: String,
    active_clients: usize,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    connections: ConnectionStats,
}

async fn health_handler<H: RequestHandler + 'static>(
    State(server): State<Arc<Server<H>>>,
) -> impl IntoResponse {
    let running = server.is_running().await;
    let response = HealthResponse {
        status: if running { "ok" } else { "stopped" },
        running,
        transport: server.transport_url().to_string(),
        active_clients: server.active_clients().await,
    };

    (StatusCode::OK, Json(response))
}

async fn stats_handler<H: RequestHandler + 'static>(
    State(server): State<Arc<Server<H>>>,
) -> impl IntoResponse {
    let response = StatsResponse {
        connections: server.connection_stats().await,
    };

    (StatusCode::OK, Json(response))
}

/// Binds and serves the status endpoint until the server it reports on
/// shuts down.
pub async fn serve<H: RequestHandler + 'static>(
    addr: String,
    server: Arc<Server<H>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut shutdown_rx = server.subscribe_shutdown();

    let app = Router::new()
        .route("/health", get(health_handler::<H>))
        .route("/stats", get(stats_handler::<H>))
        .with_state(server);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "http status endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("http status endpoint shutting down");
        })
        .await?;

    Ok(())
}
