//! Admin HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::AgentError;
use crate::server::handlers::{controller_handler, health_handler, version_handler};
use crate::server::state::ServerState;

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/version", get(version_handler))
        .route("/debug/controller", get(controller_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the admin server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AgentError>>, AgentError> {
    let app = router(state);

    let addr = options.address();
    info!("Starting admin server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AgentError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AgentError::ServerError(e.to_string()))
    });

    Ok(handle)
}
