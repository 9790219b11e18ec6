pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod geo;
pub mod map;
pub mod models;
pub mod protocol;
pub mod server;
pub mod state;
pub mod tracking;
pub mod utils;

pub use api::types::{ApiResponse, ApiResult};
pub use channel::RealtimeChannel;
pub use config::{Config, RawConfig};
pub use server::Server;
pub use tracking::{OrderBoard, OrderBoardFeed, OrderTracker};
