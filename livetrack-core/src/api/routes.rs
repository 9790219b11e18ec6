use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;

use super::handlers;
use crate::state::AppState;

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/orders", get(handlers::list_orders))
        .route("/map", get(handlers::map_view))
        .route("/track/{order_id}", post(handlers::start_tracking))
        .route("/track", delete(handlers::stop_tracking))
}
