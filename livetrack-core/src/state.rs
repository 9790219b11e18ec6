use std::sync::{Arc, Mutex};

use crate::{
    channel::RealtimeChannel,
    map::MapRenderer,
    tracking::{OrderBoard, OrderTracker},
};

pub type Board = Arc<Mutex<OrderBoard>>;

/// Everything the view server reads from and acts on.
pub struct AppState {
    pub channel: RealtimeChannel,
    pub board: Board,
    pub tracker: tokio::sync::Mutex<OrderTracker>,
    pub renderer: MapRenderer,
}

impl AppState {
    pub fn new(
        channel: RealtimeChannel,
        board: Board,
        tracker: OrderTracker,
        renderer: MapRenderer,
    ) -> Self {
        Self {
            channel,
            board,
            tracker: tokio::sync::Mutex::new(tracker),
            renderer,
        }
    }
}
