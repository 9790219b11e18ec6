use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{
    order::{Order, StatusUpdate},
    position::{LatLng, PositionUpdate},
};

pub const JOIN_ORDER: &str = "join-order";
pub const JOIN_USER_ROOM: &str = "join-user-room";
pub const JOIN_ADMIN_ROOM: &str = "join-admin-room";
pub const START_COURIER: &str = "start-courier";

pub const COURIER_LOCATION: &str = "courier-location";
pub const ORDER_STATUS_UPDATED: &str = "order-status-updated";
pub const NEW_ORDER: &str = "new-order";

/// A broadcast group on the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Order(String),
    User(String),
    Admin,
}

impl Room {
    /// Event name and argument of the join message for this room.
    pub fn join_message(&self) -> (&'static str, Option<Value>) {
        match self {
            Room::Order(order_id) => (JOIN_ORDER, Some(Value::String(order_id.clone()))),
            Room::User(user_id) => (JOIN_USER_ROOM, Some(Value::String(user_id.clone()))),
            Room::Admin => (JOIN_ADMIN_ROOM, None),
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Order(id) => write!(f, "order:{id}"),
            Room::User(id) => write!(f, "user:{id}"),
            Room::Admin => f.write_str("admin"),
        }
    }
}

/// Outbound request asking the backend to begin synthetic courier motion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCourier {
    pub order_id: String,
    pub user_lat: f64,
    pub user_lng: f64,
}

impl StartCourier {
    pub fn new(order_id: impl Into<String>, shopper: LatLng) -> Self {
        Self {
            order_id: order_id.into(),
            user_lat: shopper.lat,
            user_lng: shopper.lng,
        }
    }
}

/// Typed view of the events the backend pushes to this client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    CourierLocation(PositionUpdate),
    OrderStatusUpdated(StatusUpdate),
    NewOrder(Box<Order>),
}

impl InboundEvent {
    /// Decode a named event; `Ok(None)` for event names this client ignores.
    pub fn decode(name: &str, data: &Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match name {
            COURIER_LOCATION => InboundEvent::CourierLocation(PositionUpdate::deserialize(data)?),
            ORDER_STATUS_UPDATED => {
                InboundEvent::OrderStatusUpdated(StatusUpdate::deserialize(data)?)
            }
            NEW_ORDER => InboundEvent::NewOrder(Box::new(Order::deserialize(data)?)),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
