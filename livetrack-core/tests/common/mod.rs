#![allow(dead_code)]

use axum::{Router, body::Body, http::Request};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use livetrack_core::{
    OrderBoard, OrderTracker, RealtimeChannel,
    channel::{
        ChannelOptions,
        memory::{MemoryConnector, MemoryPeer, MemoryServer},
    },
    geo::DeviceGeolocation,
    map::MapRenderer,
    models::order::{Order, OrderStatus},
    server,
    state::AppState,
};

pub fn order(id: &str, status: OrderStatus) -> Order {
    serde_json::from_value(serde_json::json!({
        "_id": id,
        "status": status,
        "products": [{"product": {"name": "Kettle"}, "quantity": 1, "price": 450}],
        "totalAmount": 450,
        "seller": {"name": "Acme"}
    }))
    .unwrap()
}

/// A channel connected to an in-process backend.
pub async fn connected_channel() -> (RealtimeChannel, MemoryServer, MemoryPeer) {
    let (connector, mut server) = MemoryConnector::pair();
    let channel = RealtimeChannel::init(connector, ChannelOptions::default());
    let (result, peer) = tokio::join!(channel.connect(), async {
        let mut peer = server.accept().await.unwrap();
        assert!(peer.handshake().await);
        peer
    });
    result.unwrap();
    (channel, server, peer)
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub peer: MemoryPeer,
    _server: MemoryServer,
}

pub async fn test_app(geo: DeviceGeolocation, renderer: MapRenderer) -> TestApp {
    let (channel, server, peer) = connected_channel().await;
    let board = Arc::new(Mutex::new(OrderBoard::new(vec![
        order("65f1c0ffee00000000abc123", OrderStatus::Confirmed),
        order("65f1c0ffee00000000pend01", OrderStatus::Pending),
        order("65f1c0ffee00000000pend02", OrderStatus::Pending),
        order("65f1c0ffee00000000done01", OrderStatus::Delivered),
    ])));
    let tracker = OrderTracker::new(channel.clone(), Arc::new(geo));
    let state = Arc::new(AppState::new(channel, board, tracker, renderer));

    TestApp {
        router: server::app(state.clone()),
        state,
        peer,
        _server: server,
    }
}

pub async fn call(router: &Router, method: &str, uri: &str) -> (u16, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status().as_u16();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}
