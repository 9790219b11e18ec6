use axum::{Json, Router, http::StatusCode};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tracing::info;

use crate::api::routes;
use crate::state::AppState;

/// The local view router with its `NOT_FOUND` fallback.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::configure_api_routes())
        .fallback(|| async {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "NOT_FOUND" })),
            )
        })
        .with_state(state)
}

pub struct Server {
    state: Arc<AppState>,
    port: u16,
}

impl Server {
    pub fn new(state: Arc<AppState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "view server listening");

        axum::serve(listener, app(self.state))
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
