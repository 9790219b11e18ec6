use thiserror::Error;

use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("geolocation is not supported on this device")]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine.io packet type {0:?}")]
    UnknownEnginePacket(char),
    #[error("unknown socket.io packet type {0:?}")]
    UnknownSocketPacket(char),
    #[error("binary packets are not supported")]
    Binary,
    #[error("malformed payload: {0}")]
    Payload(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("realtime connection unavailable: {0}")]
    ConnectionUnavailable(String),
    #[error("realtime channel is shut down")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("order {0} is not in the visible order list")]
    UnknownOrder(String),
    #[error("order {order_id} cannot be tracked while {status}")]
    NotTrackable {
        order_id: String,
        status: OrderStatus,
    },
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name} url {value:?}: {source}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme {0:?}, expected http, https, ws or wss")]
    UnsupportedScheme(String),
    #[error("shopper latitude and longitude must be given together")]
    IncompleteShopperPosition,
    #[error("shopper position ({lat}, {lng}) is out of range")]
    ShopperPositionOutOfRange { lat: f64, lng: f64 },
}
