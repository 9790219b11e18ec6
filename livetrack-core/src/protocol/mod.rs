//! Socket.IO v4 framing over the engine.io websocket transport.

pub mod packet;

pub use packet::{EnginePacket, Handshake, SocketPacket};

use url::Url;

use crate::error::ConfigError;

pub const ENGINE_IO_PATH: &str = "/socket.io/";

/// Websocket endpoint for a Socket.IO server given its http(s) base url.
pub fn socket_endpoint(base: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(base).map_err(|source| ConfigError::InvalidUrl {
        name: "socket",
        value: base.to_string(),
        source,
    })?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    // Switching between the special http/ws schemes is always accepted.
    let _ = url.set_scheme(scheme);

    url.set_path(ENGINE_IO_PATH);
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}
