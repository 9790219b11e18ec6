use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace, warn};

use super::{
    listen,
    session::{ApplyOutcome, SessionState, TrackingSession},
};
use crate::{
    channel::{Listener, RealtimeChannel},
    error::TrackingError,
    geo::GeolocationProvider,
    models::{
        events::{
            COURIER_LOCATION, InboundEvent, ORDER_STATUS_UPDATED, Room, START_COURIER,
            StartCourier,
        },
        order::Order,
        position::{CourierFix, LatLng},
    },
    utils::sync::lock,
};

/// Handlers attached for the lifetime of one session.
struct SessionListeners {
    _position: Listener,
    _status: Listener,
}

type ListenerSlot = Arc<Mutex<Option<SessionListeners>>>;

/// Drives one [`TrackingSession`] against the shared channel.
///
/// The session listeners live exactly as long as a session does: they are
/// attached when tracking starts and detached on [`stop`](Self::stop), when
/// another order is tracked, when the tracked order leaves `CONFIRMED`, or
/// when the tracker is dropped. Rooms are never left; joining again later is
/// a no-op.
pub struct OrderTracker {
    channel: RealtimeChannel,
    geo: Arc<dyn GeolocationProvider>,
    session: Arc<Mutex<TrackingSession>>,
    snapshots: Arc<watch::Sender<SessionState>>,
    listeners: ListenerSlot,
}

impl OrderTracker {
    pub fn new(channel: RealtimeChannel, geo: Arc<dyn GeolocationProvider>) -> Self {
        let (snapshots, _) = watch::channel(SessionState::Idle);
        Self {
            channel,
            geo,
            session: Arc::new(Mutex::new(TrackingSession::new())),
            snapshots: Arc::new(snapshots),
            listeners: Arc::new(Mutex::new(None)),
        }
    }

    /// Start following `order`, ending any session already in progress.
    ///
    /// Fails without touching the channel when the order is not confirmed
    /// or the shopper position cannot be obtained.
    #[instrument(skip_all, fields(order_id = %order.id))]
    pub async fn track(&mut self, order: &Order) -> Result<(), TrackingError> {
        if !order.status.is_trackable() {
            return Err(TrackingError::NotTrackable {
                order_id: order.id.clone(),
                status: order.status,
            });
        }

        self.stop();

        let shopper = match self.geo.request_position().await {
            Ok(position) => position,
            Err(e) => {
                warn!(error = %e, "cannot track without the shopper position");
                return Err(e.into());
            }
        };

        lock(&self.session).request(order, shopper)?;
        self.publish();

        if let Err(e) = self.channel.join_room(Room::Order(order.id.clone())) {
            warn!(error = %e, "could not join the order room");
            lock(&self.session).reset();
            self.publish();
            return Err(e.into());
        }

        let listeners = self.attach_listeners();
        *lock(&self.listeners) = Some(listeners);
        lock(&self.session).activate();
        self.publish();

        // Fire and forget: the first courier-location is the confirmation.
        if let Err(e) = self
            .channel
            .emit(START_COURIER, &StartCourier::new(order.id.clone(), shopper))
        {
            warn!(error = %e, "start-courier request not sent");
        }

        info!(lat = shopper.lat, lng = shopper.lng, "tracking started");
        Ok(())
    }

    /// End the current session, if any, and return its order id.
    pub fn stop(&mut self) -> Option<String> {
        detach(&self.listeners);
        let previous = lock(&self.session).reset();
        if let Some(order_id) = &previous {
            info!(%order_id, "tracking stopped");
            self.publish();
        }
        previous
    }

    pub fn snapshot(&self) -> SessionState {
        lock(&self.session).state().clone()
    }

    /// Receives the session state after every transition and applied update.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.snapshots.subscribe()
    }

    pub fn order_id(&self) -> Option<String> {
        lock(&self.session).order_id().map(String::from)
    }

    pub fn shopper_position(&self) -> Option<LatLng> {
        lock(&self.session).shopper_position()
    }

    pub fn courier(&self) -> Option<CourierFix> {
        lock(&self.session).courier().cloned()
    }

    pub fn is_active(&self) -> bool {
        lock(&self.session).is_active()
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn attach_listeners(&self) -> SessionListeners {
        let session = self.session.clone();
        let snapshots = self.snapshots.clone();
        let position = listen(&self.channel, COURIER_LOCATION, move |event| {
            let InboundEvent::CourierLocation(update) = event else {
                return;
            };

            let mut session = lock(&session);
            match session.apply(&update) {
                ApplyOutcome::Applied => {
                    trace!(order_id = %update.order_id, lat = update.lat, lng = update.lng, "courier moved");
                    snapshots.send_replace(session.state().clone());
                }
                ApplyOutcome::Stale => {
                    debug!(order_id = %update.order_id, "stale courier-location dropped");
                }
            }
        });

        let session = self.session.clone();
        let snapshots = self.snapshots.clone();
        // Weak: the slot owns this handler's listener.
        let slot: Weak<Mutex<Option<SessionListeners>>> = Arc::downgrade(&self.listeners);
        let status = listen(&self.channel, ORDER_STATUS_UPDATED, move |event| {
            let InboundEvent::OrderStatusUpdated(update) = event else {
                return;
            };
            if update.status.is_trackable() {
                return;
            }

            {
                let mut session = lock(&session);
                if session.order_id() != Some(update.order_id.as_str()) {
                    return;
                }
                session.reset();
                snapshots.send_replace(session.state().clone());
            }
            info!(order_id = %update.order_id, status = %update.status, "order no longer in transit; tracking ended");

            if let Some(slot) = slot.upgrade() {
                detach(&slot);
            }
        });

        SessionListeners {
            _position: position,
            _status: status,
        }
    }
}

/// Drop the session listeners outside the slot lock.
fn detach(slot: &Mutex<Option<SessionListeners>>) {
    let listeners = lock(slot).take();
    drop(listeners);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{
            ChannelOptions,
            memory::{MemoryConnector, MemoryPeer},
        },
        error::GeoError,
        geo::DeviceGeolocation,
        models::order::OrderStatus,
        tracking::{OrderBoard, OrderBoardFeed},
    };
    use serde_json::json;
    use std::time::Duration;

    const SHOPPER: LatLng = LatLng::new(12.9, 77.5);

    fn order(id: &str, status: OrderStatus) -> Order {
        Order {
            id: id.into(),
            status,
            products: Vec::new(),
            total_amount: 0.0,
            seller: None,
            created_at: None,
        }
    }

    async fn setup(geo: DeviceGeolocation) -> (OrderTracker, RealtimeChannel, MemoryPeer) {
        let (connector, mut server) = MemoryConnector::pair();
        let channel = RealtimeChannel::init(connector, ChannelOptions::default());
        let (result, peer) = tokio::join!(channel.connect(), async {
            let mut peer = server.accept().await.unwrap();
            assert!(peer.handshake().await);
            peer
        });
        result.unwrap();
        (OrderTracker::new(channel.clone(), Arc::new(geo)), channel, peer)
    }

    async fn wait_for_courier(tracker: &OrderTracker, wanted: LatLng) {
        let mut rx = tracker.subscribe();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|state| match state {
                SessionState::Active { courier, .. } => {
                    courier.as_ref().map(|fix| fix.position) == Some(wanted)
                }
                _ => false,
            }),
        )
        .await
        .expect("courier position not applied")
        .unwrap();
    }

    /// Pushes a marker event and waits until the connection task has dispatched it,
    /// so every frame pushed earlier has been handled too.
    async fn flush(channel: &RealtimeChannel, peer: &MemoryPeer) {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _marker = channel.on("flush", move |_| {
            let _ = tx.send(());
        });
        assert!(peer.emit("flush", json!(null)));
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_track_joins_room_and_starts_courier() {
        let (mut tracker, channel, mut peer) = setup(DeviceGeolocation::Granted(SHOPPER)).await;

        tracker
            .track(&order("abc123", OrderStatus::Confirmed))
            .await
            .unwrap();
        assert!(tracker.is_active());
        assert!(channel.is_member(&Room::Order("abc123".into())));

        assert_eq!(
            peer.next_event().await.unwrap(),
            ("join-order".to_string(), vec![json!("abc123")])
        );
        assert_eq!(
            peer.next_event().await.unwrap(),
            (
                "start-courier".to_string(),
                vec![json!({"orderId": "abc123", "userLat": 12.9, "userLng": 77.5})]
            )
        );
    }

    #[tokio::test]
    async fn test_position_updates_fold_into_session() {
        let (mut tracker, channel, peer) = setup(DeviceGeolocation::Granted(SHOPPER)).await;
        tracker
            .track(&order("abc123", OrderStatus::Confirmed))
            .await
            .unwrap();

        peer.emit(
            "courier-location",
            json!({"orderId": "abc123", "lat": 13.0, "lng": 77.6}),
        );
        wait_for_courier(&tracker, LatLng::new(13.0, 77.6)).await;

        peer.emit(
            "courier-location",
            json!({"orderId": "other", "lat": 1.0, "lng": 1.0}),
        );
        peer.emit("courier-location", json!({"orderId": "abc123"}));
        flush(&channel, &peer).await;
        assert_eq!(
            tracker.courier().map(|fix| fix.position),
            Some(LatLng::new(13.0, 77.6))
        );
    }

    #[tokio::test]
    async fn test_geolocation_denied_blocks_session() {
        let (mut tracker, channel, mut peer) = setup(DeviceGeolocation::Denied).await;

        let err = tracker
            .track(&order("abc123", OrderStatus::Confirmed))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::Geo(GeoError::PermissionDenied)));
        assert_eq!(tracker.snapshot(), SessionState::Idle);
        assert_eq!(channel.listener_count(COURIER_LOCATION), 0);

        // Nothing but the marker reaches the backend.
        channel.emit("marker", &json!(1)).unwrap();
        assert_eq!(
            peer.next_event().await.unwrap(),
            ("marker".to_string(), vec![json!(1)])
        );
    }

    #[tokio::test]
    async fn test_non_confirmed_order_is_rejected() {
        let (mut tracker, channel, _peer) = setup(DeviceGeolocation::Granted(SHOPPER)).await;
        let err = tracker
            .track(&order("abc123", OrderStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::NotTrackable { .. }));
        assert!(channel.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_stop_and_drop_detach_listener() {
        let (mut tracker, channel, peer) = setup(DeviceGeolocation::Granted(SHOPPER)).await;
        let before = channel.listener_count(COURIER_LOCATION);

        tracker
            .track(&order("abc123", OrderStatus::Confirmed))
            .await
            .unwrap();
        assert_eq!(channel.listener_count(COURIER_LOCATION), before + 1);

        assert_eq!(tracker.stop().as_deref(), Some("abc123"));
        assert_eq!(channel.listener_count(COURIER_LOCATION), before);

        peer.emit(
            "courier-location",
            json!({"orderId": "abc123", "lat": 13.0, "lng": 77.6}),
        );
        flush(&channel, &peer).await;
        assert_eq!(tracker.snapshot(), SessionState::Idle);
        // Rooms are kept for a cheap re-join.
        assert!(channel.is_member(&Room::Order("abc123".into())));

        tracker
            .track(&order("abc123", OrderStatus::Confirmed))
            .await
            .unwrap();
        tracker
            .track(&order("abc123", OrderStatus::Confirmed))
            .await
            .unwrap();
        assert_eq!(channel.listener_count(COURIER_LOCATION), before + 1);

        drop(tracker);
        assert_eq!(channel.listener_count(COURIER_LOCATION), before);
    }

    #[tokio::test]
    async fn test_switching_orders() {
        let (mut tracker, channel, peer) = setup(DeviceGeolocation::Granted(SHOPPER)).await;
        tracker
            .track(&order("abc123", OrderStatus::Confirmed))
            .await
            .unwrap();
        peer.emit(
            "courier-location",
            json!({"orderId": "abc123", "lat": 13.0, "lng": 77.6}),
        );
        wait_for_courier(&tracker, LatLng::new(13.0, 77.6)).await;

        tracker
            .track(&order("xyz789", OrderStatus::Confirmed))
            .await
            .unwrap();
        assert_eq!(tracker.order_id().as_deref(), Some("xyz789"));
        assert!(tracker.courier().is_none());
        assert_eq!(channel.listener_count(COURIER_LOCATION), 1);

        peer.emit(
            "courier-location",
            json!({"orderId": "abc123", "lat": 13.1, "lng": 77.7}),
        );
        flush(&channel, &peer).await;
        assert!(tracker.courier().is_none());

        peer.emit(
            "courier-location",
            json!({"orderId": "xyz789", "lat": 12.8, "lng": 77.4}),
        );
        wait_for_courier(&tracker, LatLng::new(12.8, 77.4)).await;
    }

    #[tokio::test]
    async fn test_order_leaving_transit_ends_session() {
        let (mut tracker, channel, peer) = setup(DeviceGeolocation::Granted(SHOPPER)).await;
        let board = Arc::new(Mutex::new(OrderBoard::new(vec![
            order("abc123", OrderStatus::Confirmed),
            order("xyz789", OrderStatus::Confirmed),
        ])));
        let _feed = OrderBoardFeed::attach(&channel, board.clone());

        tracker
            .track(&order("abc123", OrderStatus::Confirmed))
            .await
            .unwrap();
        assert_eq!(channel.listener_count(ORDER_STATUS_UPDATED), 2);

        // Other orders and non-terminal updates leave the session alone.
        peer.emit(
            ORDER_STATUS_UPDATED,
            json!({"orderId": "xyz789", "status": "DELIVERED"}),
        );
        peer.emit(
            ORDER_STATUS_UPDATED,
            json!({"orderId": "abc123", "status": "CONFIRMED"}),
        );
        flush(&channel, &peer).await;
        assert!(tracker.is_active());

        peer.emit(
            ORDER_STATUS_UPDATED,
            json!({"orderId": "abc123", "status": "DELIVERED"}),
        );
        peer.emit(
            COURIER_LOCATION,
            json!({"orderId": "abc123", "lat": 13.0, "lng": 77.6}),
        );
        flush(&channel, &peer).await;

        assert_eq!(
            lock(&board).find("abc123").map(|o| o.status),
            Some(OrderStatus::Delivered)
        );
        assert!(!tracker.is_active());
        assert!(tracker.courier().is_none());
        assert_eq!(tracker.snapshot(), SessionState::Idle);
        assert_eq!(channel.listener_count(COURIER_LOCATION), 0);
        assert_eq!(channel.listener_count(ORDER_STATUS_UPDATED), 1);
        assert_eq!(tracker.stop(), None);
    }
}
