pub mod board;
pub mod session;
pub mod tracker;

pub use board::{OrderBoard, OrderBoardFeed, StatusChange, StatusCount};
pub use session::{ApplyOutcome, SessionState, TrackingSession};
pub use tracker::OrderTracker;

use tracing::{debug, trace};

use crate::{
    channel::{Listener, RealtimeChannel},
    models::events::InboundEvent,
};

/// Attach a handler that receives `event` in its typed form. Payloads that
/// do not decode are dropped.
pub(crate) fn listen<F>(channel: &RealtimeChannel, event: &'static str, handler: F) -> Listener
where
    F: Fn(InboundEvent) + Send + Sync + 'static,
{
    channel.on(event, move |payload| match InboundEvent::decode(event, payload) {
        Ok(Some(inbound)) => handler(inbound),
        Ok(None) => trace!(event, "event has no typed form"),
        Err(e) => debug!(event, error = %e, "dropping malformed event"),
    })
}
