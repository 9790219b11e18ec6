use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::TrackingError,
    models::{
        order::Order,
        position::{CourierFix, LatLng, PositionUpdate},
    },
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Requesting {
        order_id: String,
        shopper: LatLng,
    },
    Active {
        order_id: String,
        shopper: LatLng,
        courier: Option<CourierFix>,
        started_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// No active session for the update's order; the update was dropped.
    Stale,
}

/// Client-local state of one order's live position stream.
///
/// `Idle -> Requesting -> Active -> Idle`. The shopper position is captured
/// when the session is requested and never changes afterwards; the courier
/// position is replaced wholesale by every matching update.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSession {
    state: SessionState,
}

impl Default for TrackingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    /// Begin a session for `order`, replacing any session in progress.
    pub fn request(&mut self, order: &Order, shopper: LatLng) -> Result<(), TrackingError> {
        if !order.status.is_trackable() {
            return Err(TrackingError::NotTrackable {
                order_id: order.id.clone(),
                status: order.status,
            });
        }
        self.state = SessionState::Requesting {
            order_id: order.id.clone(),
            shopper,
        };
        Ok(())
    }

    /// `Requesting -> Active`; returns false from any other state.
    pub fn activate(&mut self) -> bool {
        let SessionState::Requesting { order_id, shopper } = &self.state else {
            return false;
        };
        let (order_id, shopper) = (order_id.clone(), *shopper);
        self.state = SessionState::Active {
            order_id,
            shopper,
            courier: None,
            started_at: Utc::now(),
        };
        true
    }

    pub fn apply(&mut self, update: &PositionUpdate) -> ApplyOutcome {
        match &mut self.state {
            SessionState::Active {
                order_id, courier, ..
            } if *order_id == update.order_id => {
                *courier = Some(CourierFix::from(update));
                ApplyOutcome::Applied
            }
            _ => ApplyOutcome::Stale,
        }
    }

    /// Back to `Idle`; returns the order that was being tracked.
    pub fn reset(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Idle => None,
            SessionState::Requesting { order_id, .. } | SessionState::Active { order_id, .. } => {
                Some(order_id)
            }
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    pub fn order_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Requesting { order_id, .. } | SessionState::Active { order_id, .. } => {
                Some(order_id)
            }
        }
    }

    pub fn shopper_position(&self) -> Option<LatLng> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Requesting { shopper, .. } | SessionState::Active { shopper, .. } => {
                Some(*shopper)
            }
        }
    }

    pub fn courier(&self) -> Option<&CourierFix> {
        match &self.state {
            SessionState::Active { courier, .. } => courier.as_ref(),
            _ => None,
        }
    }

    pub fn courier_position(&self) -> Option<LatLng> {
        self.courier().map(|fix| fix.position)
    }
}
