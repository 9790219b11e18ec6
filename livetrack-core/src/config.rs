use std::time::Duration;
use url::Url;

use crate::{
    api::{OrdersApi, client::DEFAULT_HTTP_TIMEOUT},
    channel::{ChannelOptions, WsConnector},
    error::{ApiError, ConfigError},
    geo::DeviceGeolocation,
    map::{MapRenderer, TileSurface},
    models::position::LatLng,
    protocol::socket_endpoint,
    utils::backoff::ReconnectPolicy,
};

pub const DEFAULT_SOCKET_URL: &str = "http://localhost:5000";
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_PORT: u16 = 3113;

/// Unvalidated settings as read from flags and the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConfig {
    pub socket_url: String,
    pub api_url: String,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub seller: bool,
    pub shopper_lat: Option<f64>,
    pub shopper_lng: Option<f64>,
    pub deny_location: bool,
    pub order_id: Option<String>,
    pub port: u16,
    pub headless: bool,
    pub reconnect_attempts: Option<u32>,
    pub connect_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            socket_url: DEFAULT_SOCKET_URL.into(),
            api_url: DEFAULT_API_URL.into(),
            token: None,
            user_id: None,
            seller: false,
            shopper_lat: None,
            shopper_lng: None,
            deny_location: false,
            order_id: None,
            port: DEFAULT_PORT,
            headless: false,
            reconnect_attempts: None,
            connect_timeout_secs: 10,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub socket_endpoint: Url,
    pub api_url: String,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub seller: bool,
    pub shopper: Option<LatLng>,
    pub deny_location: bool,
    pub order_id: Option<String>,
    pub port: u16,
    pub headless: bool,
    pub reconnect_attempts: Option<u32>,
    pub connect_timeout: Duration,
    pub http_timeout: Duration,
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let socket_endpoint = socket_endpoint(&raw.socket_url)?;

        let api = Url::parse(&raw.api_url).map_err(|source| ConfigError::InvalidUrl {
            name: "api",
            value: raw.api_url.clone(),
            source,
        })?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(api.scheme().to_string()));
        }

        let shopper = match (raw.shopper_lat, raw.shopper_lng) {
            (Some(lat), Some(lng)) => {
                let position = LatLng::new(lat, lng);
                if !position.is_valid() {
                    return Err(ConfigError::ShopperPositionOutOfRange { lat, lng });
                }
                Some(position)
            }
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteShopperPosition),
        };

        Ok(Self {
            socket_endpoint,
            api_url: raw.api_url,
            token: raw.token.filter(|t| !t.is_empty()),
            user_id: raw.user_id.filter(|u| !u.is_empty()),
            seller: raw.seller,
            shopper,
            deny_location: raw.deny_location,
            order_id: raw.order_id.filter(|o| !o.is_empty()),
            port: raw.port,
            headless: raw.headless,
            reconnect_attempts: raw.reconnect_attempts,
            connect_timeout: Duration::from_secs(raw.connect_timeout_secs.max(1)),
            http_timeout: Duration::from_secs(raw.http_timeout_secs.max(1)),
        })
    }
}

impl Config {
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            connect_timeout: self.connect_timeout,
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect_attempts,
                ..ReconnectPolicy::default()
            },
            ..ChannelOptions::default()
        }
    }

    pub fn connector(&self) -> WsConnector {
        let connector = WsConnector::new(self.socket_endpoint.clone());
        match &self.token {
            Some(token) => connector.with_bearer(token.clone()),
            None => connector,
        }
    }

    pub fn orders_api(&self) -> Result<OrdersApi, ApiError> {
        OrdersApi::new(self.api_url.clone(), self.token.clone(), self.http_timeout)
    }

    pub fn geolocation(&self) -> DeviceGeolocation {
        DeviceGeolocation::from_settings(self.shopper, self.deny_location)
    }

    pub fn renderer(&self) -> MapRenderer {
        if self.headless {
            MapRenderer::headless()
        } else {
            MapRenderer::with_surface(TileSurface::default())
        }
    }
}
