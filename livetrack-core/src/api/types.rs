use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    channel::ConnectionStatus,
    error::{GeoError, TrackingError},
    map::MapView,
    models::order::{Order, OrderStatus},
    tracking::{SessionState, StatusCount},
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Success { data: T, error: Option<()> },
    Error { data: Option<()>, error: String },
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::Success { data, error: None }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            data: None,
            error: error.into(),
        }
    }
}

// Type-safe wrapper for axum responses that enforces our API response format
pub struct ApiResult<T> {
    pub status: StatusCode,
    pub body: ApiResponse<T>,
}

impl<T> ApiResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            body: ApiResponse::success(data),
        }
    }

    pub fn error(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiResponse::error(error),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResult<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl<T> From<TrackingError> for ApiResult<T> {
    fn from(e: TrackingError) -> Self {
        let status = match &e {
            TrackingError::UnknownOrder(_) => StatusCode::NOT_FOUND,
            TrackingError::NotTrackable { .. } => StatusCode::CONFLICT,
            TrackingError::Geo(GeoError::PermissionDenied) => StatusCode::FORBIDDEN,
            TrackingError::Geo(GeoError::Unsupported) => StatusCode::NOT_IMPLEMENTED,
            TrackingError::Channel(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::error(status, e.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub channel: ConnectionStatus,
    pub rooms: usize,
    pub tracking: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
}

/// One row of the order list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: String,
    pub reference: String,
    pub status: OrderStatus,
    pub status_message: &'static str,
    pub seller: String,
    pub items: usize,
    pub total_amount: f64,
    pub trackable: bool,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.clone(),
            reference: order.display_ref(),
            status: order.status,
            status_message: order.status.message(),
            seller: order.seller_name().to_string(),
            items: order.products.len(),
            total_amount: order.total_amount,
            trackable: order.status.is_trackable(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderList {
    pub filter: OrderStatus,
    pub counts: Vec<StatusCount>,
    pub orders: Vec<OrderSummary>,
}

#[derive(Debug, Serialize)]
pub struct MapSnapshot {
    pub session: SessionState,
    pub view: MapView,
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct Stopped {
    pub stopped: Option<String>,
}
