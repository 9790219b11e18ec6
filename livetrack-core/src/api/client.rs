use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{error::ApiError, models::order::Order};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Read-only client for the storefront order endpoints.
#[derive(Debug, Clone)]
pub struct OrdersApi {
    http: Client,
    base: String,
    token: Option<String>,
}

impl OrdersApi {
    pub fn new(
        base: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self { http, base, token })
    }

    /// Orders placed by the authenticated shopper.
    pub async fn my_orders(&self) -> Result<Vec<Order>, ApiError> {
        self.get_orders("orders/my").await
    }

    /// Orders received by the authenticated seller.
    pub async fn seller_orders(&self) -> Result<Vec<Order>, ApiError> {
        self.get_orders("orders/seller").await
    }

    #[instrument(skip(self))]
    async fn get_orders(&self, path: &str) -> Result<Vec<Order>, ApiError> {
        let mut request = self.http.get(format!("{}/{path}", self.base));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = check_status(request.send().await?).await?;
        let orders: Vec<Order> = response.json().await?;
        debug!(count = orders.len(), "orders fetched");
        Ok(orders)
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .or_else(|| status.canonical_reason().map(String::from))
        .unwrap_or_else(|| "request failed".into());

    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}
