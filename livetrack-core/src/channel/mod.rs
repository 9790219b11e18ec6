pub mod client;
pub mod memory;
pub mod transport;

pub use client::{ChannelOptions, ConnectionStatus, Listener, RealtimeChannel};
pub use transport::{Connector, Transport, WsConnector};
