use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, header::AUTHORIZATION},
    response::Response,
    routing::get,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

use livetrack_core::{
    OrderTracker, RealtimeChannel,
    channel::{ChannelOptions, ConnectionStatus, WsConnector},
    geo::DeviceGeolocation,
    models::{
        order::{Order, OrderStatus},
        position::LatLng,
    },
    protocol::socket_endpoint,
    tracking::SessionState,
};

type Log = mpsc::UnboundedSender<String>;

async fn upgrade(ws: WebSocketUpgrade, headers: HeaderMap, State(log): State<Log>) -> Response {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let _ = log.send(format!("auth:{auth}"));
    ws.on_upgrade(move |socket| stub_backend(socket, log))
}

/// Minimal Socket.IO server: handshake, then one courier fix per start-courier.
async fn stub_backend(mut socket: WebSocket, log: Log) {
    let open = r#"0{"sid":"stub","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
    if socket.send(Message::Text(open.into())).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let text = text.as_str().to_string();

        if text == "40" {
            let _ = socket
                .send(Message::Text(r#"40{"sid":"stub-socket"}"#.into()))
                .await;
            continue;
        }

        if text.starts_with(r#"42["start-courier""#) {
            let fix = r#"42["courier-location",{"orderId":"abc123","lat":13.0,"lng":77.6,"city":"Bengaluru"}]"#;
            let _ = socket.send(Message::Text(fix.into())).await;
        }
        let _ = log.send(text);
    }
}

async fn spawn_backend() -> (String, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/socket.io/", get(upgrade))
        .with_state(tx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), rx)
}

async fn next_log(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("backend saw nothing")
        .unwrap()
}

#[tokio::test]
async fn test_ws_connector_end_to_end() {
    let (base, mut log) = spawn_backend().await;
    let connector = WsConnector::new(socket_endpoint(&base).unwrap()).with_bearer("secret");
    let channel = RealtimeChannel::init(connector, ChannelOptions::default());

    channel.connect().await.unwrap();
    assert_eq!(channel.status(), ConnectionStatus::Connected);
    assert_eq!(next_log(&mut log).await, "auth:Bearer secret");

    let order: Order =
        serde_json::from_str(r#"{"_id":"abc123","status":"CONFIRMED"}"#).unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);

    let shopper = LatLng::new(12.9, 77.5);
    let mut tracker = OrderTracker::new(
        channel.clone(),
        Arc::new(DeviceGeolocation::Granted(shopper)),
    );
    let mut updates = tracker.subscribe();
    tracker.track(&order).await.unwrap();

    assert_eq!(next_log(&mut log).await, r#"42["join-order","abc123"]"#);
    assert!(next_log(&mut log).await.starts_with(r#"42["start-courier""#));

    let state = tokio::time::timeout(
        Duration::from_secs(2),
        updates.wait_for(|state| matches!(state, SessionState::Active { courier: Some(_), .. })),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    let SessionState::Active {
        courier: Some(fix), ..
    } = state
    else {
        panic!("expected an active session");
    };
    assert_eq!(fix.position, LatLng::new(13.0, 77.6));
    assert_eq!(fix.city.as_deref(), Some("Bengaluru"));

    drop(tracker);
    channel.shutdown().await;
    assert_eq!(channel.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn test_unreachable_backend_degrades() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = WsConnector::new(socket_endpoint(&format!("http://{addr}")).unwrap());
    let channel = RealtimeChannel::init(
        connector,
        ChannelOptions {
            connect_timeout: Duration::from_secs(2),
            reconnect: livetrack_core::utils::backoff::ReconnectPolicy::disabled(),
            ..ChannelOptions::default()
        },
    );

    assert!(channel.connect().await.is_err());
    assert_eq!(channel.status(), ConnectionStatus::Unavailable);
}
