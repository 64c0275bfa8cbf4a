use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::registry::JobRegistry;

/// Worker server configuration. Binds to loopback only.
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::coordinator::DEFAULT_WORKER_PORT,
        }
    }
}

#[derive(Clone)]
struct AppState {
    registry: Arc<JobRegistry>,
}

/// Build the Axum router with all routes.
pub fn build_router(registry: Arc<JobRegistry>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sessions/{id}", delete(abort_handler))
        .with_state(AppState { registry })
        .layer(CorsLayer::permissive())
}

/// Create and start the worker server. Returns a handle that keeps the
/// serve task alive; pass port 0 to bind an ephemeral port.
pub async fn start(
    config: ServerConfig,
    registry: Arc<JobRegistry>,
) -> Result<WorkerHandle, std::io::Error> {
    let router = build_router(registry);
    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "worker server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(WorkerHandle {
        port: local_addr.port(),
        _server: server_handle,
    })
}

/// Handle returned by `start()` — keeps the serve task alive.
pub struct WorkerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "jobs": state.registry.count(),
    }))
}

/// Teardown request from the session lifecycle. Always 2xx: the store is
/// authoritative, so an unknown session id is not an error here.
async fn abort_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let aborted = state.registry.abort(&id);
    info!(session_id = %id, aborted, "abort requested");
    Json(serde_json::json!({ "aborted": aborted }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_health() {
        let registry = Arc::new(JobRegistry::new());
        let handle = start(ServerConfig { port: 0 }, registry).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["jobs"], 0);
    }

    #[tokio::test]
    async fn delete_cancels_registered_job() {
        let registry = Arc::new(JobRegistry::new());
        let token = registry.register("sess-9");
        let handle = start(ServerConfig { port: 0 }, registry.clone())
            .await
            .unwrap();

        let url = format!("http://127.0.0.1:{}/sessions/sess-9", handle.port);
        let resp = reqwest::Client::new().delete(&url).send().await.unwrap();
        assert!(resp.status().is_success());

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["aborted"], true);
        assert!(token.is_cancelled());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn delete_unknown_session_is_still_success() {
        let registry = Arc::new(JobRegistry::new());
        let handle = start(ServerConfig { port: 0 }, registry).await.unwrap();

        let url = format!("http://127.0.0.1:{}/sessions/ghost", handle.port);
        let resp = reqwest::Client::new().delete(&url).send().await.unwrap();
        assert!(resp.status().is_success());

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["aborted"], false);
    }
}
