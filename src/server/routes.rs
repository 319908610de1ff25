//! Axum HTTP routes for event ingestion.

use crate::db;
use crate::error::{ApiError, ServerError};
use crate::event::Event;
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ─── Route builder ───────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    let mut api = Router::new()
        .route("/events", post(ingest_event))
        .route("/health", get(health));

    if state.db_path.is_some() {
        api = api.route("/analytics", get(analytics));
    }

    Router::new()
        .nest("/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Handlers ────────────────────────────────────────────────────

/// The body is taken raw so that every decode failure is a 400 with our
/// own error shape rather than the extractor's rejection.
async fn ingest_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let event = Event::from_json_slice(&body)?;
    state.ingress.submit(event).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    ))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn analytics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let Some(path) = state.db_path.clone() else {
        return Err(ApiError::Internal("No database configured".into()));
    };

    let summary = tokio::task::spawn_blocking(move || {
        let conn = db::open_read_only(&path)?;
        db::summarize(&conn)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Analytics task failed: {}", e)))??;

    Ok(Json(summary))
}

// ─── Server startup ──────────────────────────────────────────────

/// Serve until `shutdown` resolves, then stop accepting and finish in-flight requests
pub async fn serve<F>(state: Arc<AppState>, addr: SocketAddr, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let ingress = state.ingress.kind();
    let analytics = state.db_path.is_some();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    info!(%addr, ingress, analytics, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
