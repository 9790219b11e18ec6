use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::listen;
use crate::{
    channel::{Listener, RealtimeChannel},
    models::{
        events::{InboundEvent, NEW_ORDER, ORDER_STATUS_UPDATED},
        order::{Order, OrderStatus, StatusUpdate},
    },
    utils::sync::lock,
};

/// Effect of a status update on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied { from: OrderStatus, to: OrderStatus },
    Unchanged,
    UnknownOrder,
}

/// Per-status tallies shown on the filter tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: usize,
}

/// The shopper's or seller's order list, kept in sync by [`OrderBoardFeed`].
///
/// Newest orders come first. The backend is authoritative for statuses, so
/// transitions outside the usual lifecycle are applied anyway.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBoard {
    orders: Vec<Order>,
    filter: OrderStatus,
}

impl Default for OrderBoard {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl OrderBoard {
    pub fn new(orders: Vec<Order>) -> Self {
        Self {
            orders,
            filter: OrderStatus::Pending,
        }
    }

    /// Replace the whole list, keeping the current filter.
    pub fn load(&mut self, orders: Vec<Order>) {
        info!(count = orders.len(), "order list loaded");
        self.orders = orders;
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn find(&self, order_id: &str) -> Option<&Order> {
        self.orders.iter().find(|order| order.id == order_id)
    }

    pub fn filter(&self) -> OrderStatus {
        self.filter
    }

    pub fn set_filter(&mut self, status: OrderStatus) {
        self.filter = status;
    }

    /// Orders on the currently selected tab.
    pub fn filtered(&self) -> impl Iterator<Item = &Order> {
        self.with_status(self.filter)
    }

    pub fn with_status(&self, status: OrderStatus) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(move |order| order.status == status)
    }

    pub fn count(&self, status: OrderStatus) -> usize {
        self.with_status(status).count()
    }

    pub fn counts(&self) -> Vec<StatusCount> {
        OrderStatus::ALL
            .into_iter()
            .map(|status| StatusCount {
                status,
                count: self.count(status),
            })
            .collect()
    }

    /// Whether "track live" is offered for this order.
    pub fn can_track(&self, order_id: &str) -> bool {
        self.find(order_id)
            .is_some_and(|order| order.status.is_trackable())
    }

    pub fn apply_status(&mut self, update: &StatusUpdate) -> StatusChange {
        let Some(order) = self.orders.iter_mut().find(|o| o.id == update.order_id) else {
            debug!(order_id = %update.order_id, "status update for an order not on the board");
            return StatusChange::UnknownOrder;
        };

        let from = order.status;
        if from == update.status {
            return StatusChange::Unchanged;
        }
        if !from.can_transition_to(update.status) {
            warn!(order_id = %order.id, %from, to = %update.status, "unexpected status transition");
        }
        order.status = update.status;
        info!(order_id = %order.id, %from, to = %update.status, "order status updated");
        StatusChange::Applied {
            from,
            to: update.status,
        }
    }

    /// Put a freshly placed order at the top. An order already on the board
    /// is replaced where it stands; returns `false` in that case.
    pub fn insert_new(&mut self, order: Order) -> bool {
        if let Some(existing) = self.orders.iter_mut().find(|o| o.id == order.id) {
            debug!(order_id = %order.id, "duplicate new-order replaced in place");
            *existing = order;
            return false;
        }
        info!(order_id = %order.id, "new order received");
        self.orders.insert(0, order);
        true
    }
}

/// Keeps an [`OrderBoard`] in step with `order-status-updated` and
/// `new-order` events. Both listeners are detached when the feed is dropped.
#[derive(Debug)]
pub struct OrderBoardFeed {
    _status: Listener,
    _new_order: Listener,
}

impl OrderBoardFeed {
    pub fn attach(channel: &RealtimeChannel, board: Arc<Mutex<OrderBoard>>) -> Self {
        let status_board = board.clone();
        let status = listen(channel, ORDER_STATUS_UPDATED, move |event| {
            if let InboundEvent::OrderStatusUpdated(update) = event {
                lock(&status_board).apply_status(&update);
            }
        });

        let new_order = listen(channel, NEW_ORDER, move |event| {
            if let InboundEvent::NewOrder(order) = event {
                lock(&board).insert_new(*order);
            }
        });

        Self {
            _status: status,
            _new_order: new_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelOptions, memory::MemoryConnector};
    use serde_json::json;
    use std::time::Duration;

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

    fn board() -> OrderBoard {
        OrderBoard::new(vec![
            order("a", OrderStatus::Pending),
            order("b", OrderStatus::Confirmed),
            order("c", OrderStatus::Delivered),
            order("d", OrderStatus::Pending),
        ])
    }

    #[test]
    fn test_filter_and_counts() {
        let mut board = board();
        assert_eq!(board.filter(), OrderStatus::Pending);
        let ids: Vec<&str> = board.filtered().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["a", "d"]);

        board.set_filter(OrderStatus::Confirmed);
        assert_eq!(board.filtered().count(), 1);

        let counts: Vec<usize> = board.counts().iter().map(|c| c.count).collect();
        assert_eq!(counts, [2, 1, 1, 0]);
    }

    #[test]
    fn test_only_confirmed_offers_tracking() {
        let board = board();
        assert!(board.can_track("b"));
        assert!(!board.can_track("a"));
        assert!(!board.can_track("c"));
        assert!(!board.can_track("missing"));
    }

    #[test]
    fn test_apply_status() {
        let mut board = board();
        let change = board.apply_status(&StatusUpdate {
            order_id: "a".into(),
            status: OrderStatus::Confirmed,
        });
        assert_eq!(
            change,
            StatusChange::Applied {
                from: OrderStatus::Pending,
                to: OrderStatus::Confirmed
            }
        );
        assert!(board.can_track("a"));

        // Out-of-lifecycle transitions still land.
        let change = board.apply_status(&StatusUpdate {
            order_id: "c".into(),
            status: OrderStatus::Pending,
        });
        assert!(matches!(change, StatusChange::Applied { .. }));
        assert_eq!(board.find("c").map(|o| o.status), Some(OrderStatus::Pending));

        assert_eq!(
            board.apply_status(&StatusUpdate {
                order_id: "b".into(),
                status: OrderStatus::Confirmed,
            }),
            StatusChange::Unchanged
        );
        assert_eq!(
            board.apply_status(&StatusUpdate {
                order_id: "zzz".into(),
                status: OrderStatus::Confirmed,
            }),
            StatusChange::UnknownOrder
        );
    }

    #[test]
    fn test_insert_new_prepends_once() {
        let mut board = board();
        assert!(board.insert_new(order("e", OrderStatus::Pending)));
        assert_eq!(board.orders()[0].id, "e");
        assert!(!board.insert_new(order("e", OrderStatus::Confirmed)));
        assert_eq!(board.len(), 5);
        assert_eq!(board.orders()[0].status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_feed_follows_channel_events() {
        let (connector, mut server) = MemoryConnector::pair();
        let channel = RealtimeChannel::init(connector, ChannelOptions::default());
        let (result, peer) = tokio::join!(channel.connect(), async {
            let mut peer = server.accept().await.unwrap();
            assert!(peer.handshake().await);
            peer
        });
        result.unwrap();

        let board = Arc::new(Mutex::new(board()));
        let feed = OrderBoardFeed::attach(&channel, board.clone());
        assert_eq!(channel.listener_count(ORDER_STATUS_UPDATED), 1);
        assert_eq!(channel.listener_count(NEW_ORDER), 1);

        let (tx, mut done) = tokio::sync::mpsc::unbounded_channel();
        let _marker = channel.on("marker", move |_| {
            let _ = tx.send(());
        });

        peer.emit(ORDER_STATUS_UPDATED, json!({"orderId": "a", "status": "REJECTED"}));
        peer.emit(NEW_ORDER, json!({"_id": "f", "status": "PENDING", "totalAmount": 12.5}));
        peer.emit(NEW_ORDER, json!({"status": "PENDING"}));
        peer.emit("marker", json!(null));
        tokio::time::timeout(Duration::from_secs(2), done.recv())
            .await
            .unwrap()
            .unwrap();

        {
            let board = lock(&board);
            assert_eq!(board.find("a").map(|o| o.status), Some(OrderStatus::Rejected));
            assert_eq!(board.orders()[0].id, "f");
            assert_eq!(board.len(), 5);
        }

        drop(feed);
        assert_eq!(channel.listener_count(ORDER_STATUS_UPDATED), 0);
        assert_eq!(channel.listener_count(NEW_ORDER), 0);
    }
}
