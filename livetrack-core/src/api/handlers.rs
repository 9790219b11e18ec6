use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::info;

use super::types::{ApiResult, Health, MapSnapshot, OrderList, OrderSummary, OrdersQuery, Stopped};
use crate::{
    error::TrackingError, models::order::OrderStatus, state::AppState, tracking::SessionState,
    utils::sync::lock,
};

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Health> {
    let tracking = state.tracker.lock().await.order_id();
    ApiResult::ok(Health {
        channel: state.channel.status(),
        rooms: state.channel.rooms().len(),
        tracking,
    })
}

/// Orders on one tab. Picking a tab through `status` makes it the current one.
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrdersQuery>,
) -> ApiResult<OrderList> {
    let requested = match query.status.as_deref().map(str::parse::<OrderStatus>) {
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => return ApiResult::error(StatusCode::BAD_REQUEST, e),
        None => None,
    };

    let mut board = lock(&state.board);
    if let Some(status) = requested {
        board.set_filter(status);
    }
    ApiResult::ok(OrderList {
        filter: board.filter(),
        counts: board.counts(),
        orders: board.filtered().map(OrderSummary::from).collect(),
    })
}

pub async fn map_view(State(state): State<Arc<AppState>>) -> ApiResult<MapSnapshot> {
    let tracker = state.tracker.lock().await;
    let courier = tracker.courier();
    let view = state
        .renderer
        .render(tracker.shopper_position(), courier.as_ref());
    ApiResult::ok(MapSnapshot {
        session: tracker.snapshot(),
        summary: view.to_string(),
        view,
    })
}

pub async fn start_tracking(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> ApiResult<SessionState> {
    let order = lock(&state.board).find(&order_id).cloned();
    let Some(order) = order else {
        return TrackingError::UnknownOrder(order_id).into();
    };

    let mut tracker = state.tracker.lock().await;
    match tracker.track(&order).await {
        Ok(()) => ApiResult::ok(tracker.snapshot()),
        Err(e) => {
            info!(%order_id, error = %e, "track request refused");
            e.into()
        }
    }
}

pub async fn stop_tracking(State(state): State<Arc<AppState>>) -> ApiResult<Stopped> {
    let stopped = state.tracker.lock().await.stop();
    ApiResult::ok(Stopped { stopped })
}
