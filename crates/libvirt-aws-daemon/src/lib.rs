pub mod api;
pub mod config;
pub mod error;
pub mod state;
pub mod xml;

pub use config::{AuthConfig, DaemonConfig};
pub use error::{ApiError, ApiResult};
pub use state::DaemonState;

use axum::{routing::get, Extension, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub fn router(state: Arc<DaemonState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(api::handle).post(api::handle))
        .layer(Extension(state))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl-C.
pub async fn serve(state: Arc<DaemonState>, config: &DaemonConfig) -> std::io::Result<()> {
    let app = router(state, config.request_timeout);
    let listener = tokio::net::TcpListener::bind(config.address()).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
