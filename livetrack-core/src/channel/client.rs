use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, trace, warn};

use super::transport::{Connector, Transport};
use crate::{
    error::ChannelError,
    models::events::Room,
    protocol::{EnginePacket, Handshake, SocketPacket, packet::DEFAULT_NAMESPACE},
    utils::{backoff::ReconnectPolicy, sync::lock},
};

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Unavailable,
    Closed,
}

impl ConnectionStatus {
    /// True once the first connection attempt has an outcome.
    fn is_settled(self) -> bool {
        !matches!(self, ConnectionStatus::Idle | ConnectionStatus::Connecting)
    }
}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub connect_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(1),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Room memberships, listeners and status shared with the connection task.
struct Registry {
    rooms: Mutex<HashSet<Room>>,
    listeners: Mutex<HashMap<String, Vec<(u64, Handler)>>>,
    next_listener: AtomicU64,
    status: watch::Sender<ConnectionStatus>,
    /// Why the most recent connection attempt failed; cleared on success.
    last_error: Mutex<Option<String>>,
}

impl Registry {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                debug!(from = ?*current, to = ?status, "channel status changed");
                *current = status;
                true
            }
        });
    }

    fn record_failure(&self, error: &ChannelError) {
        let reason = match error {
            ChannelError::ConnectionUnavailable(reason) => reason.clone(),
            other => other.to_string(),
        };
        *lock(&self.last_error) = Some(reason);
    }

    fn dispatch(&self, event: &str, payload: &Value) {
        // Handlers run outside the lock so they may attach or detach listeners.
        let handlers: Vec<Handler> = lock(&self.listeners)
            .get(event)
            .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            trace!(event, "no listener for event");
            return;
        }
        for handler in handlers {
            handler(payload);
        }
    }

    fn remove_listener(&self, event: &str, id: u64) {
        let mut listeners = lock(&self.listeners);
        if let Some(entries) = listeners.get_mut(event) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                listeners.remove(event);
            }
        }
    }
}

struct PendingStart {
    connector: Box<dyn Connector>,
    cmd_rx: mpsc::UnboundedReceiver<String>,
}

#[derive(Default)]
struct Runtime {
    pending: Option<PendingStart>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

struct Inner {
    cmd_tx: mpsc::UnboundedSender<String>,
    registry: Arc<Registry>,
    runtime: Mutex<Runtime>,
    options: ChannelOptions,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // No executor to drive a graceful close from a synchronous drop.
        if let Some(task) = lock(&self.runtime).task.take() {
            task.abort();
        }
    }
}

/// Handle to the process-wide realtime connection.
///
/// Built once with [`RealtimeChannel::init`] and cloned into every consumer;
/// all clones multiplex over the same connection task. Emits and joins made
/// before [`connect`](RealtimeChannel::connect) or while reconnecting are
/// queued and flushed once the handshake completes. Room memberships are
/// re-sent after every reconnect.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl RealtimeChannel {
    pub fn init(connector: impl Connector, options: ChannelOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Idle);

        let registry = Arc::new(Registry {
            rooms: Mutex::new(HashSet::new()),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            status,
            last_error: Mutex::new(None),
        });

        Self {
            inner: Arc::new(Inner {
                cmd_tx,
                registry,
                runtime: Mutex::new(Runtime {
                    pending: Some(PendingStart {
                        connector: Box::new(connector),
                        cmd_rx,
                    }),
                    ..Runtime::default()
                }),
                options,
            }),
        }
    }

    /// Start the connection task on first use and wait for its first outcome.
    ///
    /// Calling it again never opens a second connection. An error means live
    /// updates are unavailable for now; the task keeps retrying according to
    /// the reconnect policy and queued messages go out once it succeeds.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let mut status_rx = self.inner.registry.status.subscribe();

        {
            let mut runtime = lock(&self.inner.runtime);
            if let Some(start) = runtime.pending.take() {
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                runtime.shutdown_tx = Some(shutdown_tx);
                runtime.task = Some(tokio::spawn(connection_loop(
                    self.inner.registry.clone(),
                    start.connector,
                    start.cmd_rx,
                    shutdown_rx,
                    self.inner.options.clone(),
                )));
            }
        }

        let settled = tokio::time::timeout(
            self.inner.options.connect_timeout,
            status_rx.wait_for(|status| status.is_settled()),
        )
        .await;

        match settled {
            Ok(Ok(status)) => match *status {
                ConnectionStatus::Connected => Ok(()),
                ConnectionStatus::Closed => Err(ChannelError::Closed),
                other => {
                    let reason = lock(&self.inner.registry.last_error)
                        .clone()
                        .unwrap_or_else(|| format!("channel is {other:?}"));
                    Err(ChannelError::ConnectionUnavailable(reason))
                }
            },
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => Err(ChannelError::ConnectionUnavailable(
                "timed out waiting for the first connection".into(),
            )),
        }
    }

    /// Join a room. Returns `false` without sending anything when this
    /// client is already a member.
    pub fn join_room(&self, room: Room) -> Result<bool, ChannelError> {
        if !lock(&self.inner.registry.rooms).insert(room.clone()) {
            debug!(%room, "room already joined");
            return Ok(false);
        }

        let (event, arg) = room.join_message();
        if let Err(e) = self.send_event(event, arg) {
            lock(&self.inner.registry.rooms).remove(&room);
            return Err(e);
        }
        info!(%room, "joined room");
        Ok(true)
    }

    pub fn emit<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> Result<(), ChannelError> {
        let value = serde_json::to_value(payload)?;
        self.send_event(event, Some(value))
    }

    /// Attach a handler for `event`. The handler stays registered for as
    /// long as the returned [`Listener`] is alive.
    pub fn on<F>(&self, event: &str, handler: F) -> Listener
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let registry = &self.inner.registry;
        let id = registry.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&registry.listeners)
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(event, id, "listener attached");

        Listener {
            registry: Arc::downgrade(registry),
            event: event.to_string(),
            id,
        }
    }

    /// Detach a listener; same as dropping it.
    pub fn off(&self, listener: Listener) {
        drop(listener);
    }

    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.inner.registry.listeners)
            .get(event)
            .map_or(0, Vec::len)
    }

    pub fn rooms(&self) -> Vec<Room> {
        lock(&self.inner.registry.rooms).iter().cloned().collect()
    }

    pub fn is_member(&self, room: &Room) -> bool {
        lock(&self.inner.registry.rooms).contains(room)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.registry.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.registry.status.subscribe()
    }

    /// Stop the connection task, waiting up to the configured timeout for a
    /// graceful close before aborting it.
    pub async fn shutdown(&self) {
        let (shutdown_tx, task) = {
            let mut runtime = lock(&self.inner.runtime);
            runtime.pending = None;
            (runtime.shutdown_tx.take(), runtime.task.take())
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }

        if let Some(mut task) = task {
            match tokio::time::timeout(self.inner.options.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "connection task ended abnormally"),
                Err(_) => {
                    warn!("connection task did not stop in time; aborting");
                    task.abort();
                }
            }
        }

        self.inner.registry.set_status(ConnectionStatus::Closed);
        info!("realtime channel shut down");
    }

    fn send_event(&self, event: &str, arg: Option<Value>) -> Result<(), ChannelError> {
        let frame = EnginePacket::Message(SocketPacket::event(event, arg)).encode()?;
        trace!(event, "queueing frame");
        self.inner.cmd_tx.send(frame).map_err(|_| match self.status() {
            ConnectionStatus::Unavailable => {
                ChannelError::ConnectionUnavailable("reconnect attempts exhausted".into())
            }
            _ => ChannelError::Closed,
        })
    }
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("status", &self.status())
            .field("rooms", &lock(&self.inner.registry.rooms).len())
            .finish()
    }
}

/// Disposer returned by [`RealtimeChannel::on`]; detaches its handler on drop.
#[must_use = "dropping a Listener detaches its handler immediately"]
pub struct Listener {
    registry: Weak<Registry>,
    event: String,
    id: u64,
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_listener(&self.event, self.id);
            debug!(event = %self.event, id = self.id, "listener detached");
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish()
    }
}

enum SessionExit {
    Shutdown,
    Lost(String),
}

enum FrameAction {
    Continue,
    Reply(String),
    Close(String),
}

async fn connection_loop(
    registry: Arc<Registry>,
    connector: Box<dyn Connector>,
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
    options: ChannelOptions,
) {
    let mut attempt: u32 = 0;
    let mut sessions: u64 = 0;
    // A frame the last transport refused; it goes out first on the next session.
    let mut unsent: Option<String> = None;
    registry.set_status(ConnectionStatus::Connecting);

    let final_status = loop {
        let opened = tokio::select! {
            _ = &mut shutdown_rx => break ConnectionStatus::Closed,
            opened = open_session(connector.as_ref(), options.connect_timeout) => opened,
        };

        match opened {
            Ok((transport, handshake)) => {
                attempt = 0;
                *lock(&registry.last_error) = None;
                info!(sid = %handshake.sid, "realtime channel connected");
                let exit = run_session(
                    transport,
                    &handshake,
                    &registry,
                    &mut cmd_rx,
                    &mut shutdown_rx,
                    &mut unsent,
                    sessions > 0,
                )
                .await;
                sessions += 1;
                match exit {
                    SessionExit::Shutdown => break ConnectionStatus::Closed,
                    SessionExit::Lost(reason) => warn!(%reason, "realtime connection lost"),
                }
            }
            Err(e) => {
                warn!(error = %e, attempt, "realtime connection attempt failed");
                registry.record_failure(&e);
            }
        }

        if !options.reconnect.allows(attempt) {
            warn!("giving up on the realtime channel; live updates are unavailable");
            break ConnectionStatus::Unavailable;
        }

        registry.set_status(ConnectionStatus::Reconnecting);
        let delay = options.reconnect.delay(attempt);
        attempt += 1;
        debug!(?delay, attempt, "reconnecting");

        tokio::select! {
            _ = &mut shutdown_rx => break ConnectionStatus::Closed,
            _ = tokio::time::sleep(delay) => {}
        }
    };

    // Senders must observe the closed queue no later than the final status.
    cmd_rx.close();
    registry.set_status(final_status);
}

async fn open_session(
    connector: &dyn Connector,
    timeout: Duration,
) -> Result<(Box<dyn Transport>, Handshake), ChannelError> {
    tokio::time::timeout(timeout, async {
        let mut transport = connector.connect().await?;

        let handshake = loop {
            match next_packet(transport.as_mut()).await? {
                EnginePacket::Open(handshake) => break handshake,
                other => debug!(?other, "ignoring packet before open"),
            }
        };

        transport
            .send(EnginePacket::Message(SocketPacket::connect()).encode()?)
            .await?;

        loop {
            match next_packet(transport.as_mut()).await? {
                EnginePacket::Message(SocketPacket::Connect { .. }) => break,
                EnginePacket::Message(SocketPacket::ConnectError { message, .. }) => {
                    return Err(ChannelError::ConnectionUnavailable(message));
                }
                EnginePacket::Ping => transport.send(EnginePacket::Pong.encode()?).await?,
                other => debug!(?other, "ignoring packet before connect ack"),
            }
        }

        Ok::<_, ChannelError>((transport, handshake))
    })
    .await
    .map_err(|_| ChannelError::ConnectionUnavailable("handshake timed out".into()))?
}

async fn next_packet(transport: &mut dyn Transport) -> Result<EnginePacket, ChannelError> {
    match transport.recv().await {
        Some(frame) => Ok(EnginePacket::decode(&frame?)?),
        None => Err(ChannelError::ConnectionUnavailable(
            "closed during handshake".into(),
        )),
    }
}

async fn run_session(
    mut transport: Box<dyn Transport>,
    handshake: &Handshake,
    registry: &Registry,
    cmd_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown_rx: &mut oneshot::Receiver<()>,
    unsent: &mut Option<String>,
    rejoin: bool,
) -> SessionExit {
    if rejoin {
        let rooms: Vec<Room> = lock(&registry.rooms).iter().cloned().collect();
        for room in &rooms {
            let (event, arg) = room.join_message();
            let frame = match EnginePacket::Message(SocketPacket::event(event, arg)).encode() {
                Ok(frame) => frame,
                Err(e) => return SessionExit::Lost(e.to_string()),
            };
            if let Err(e) = transport.send(frame).await {
                return SessionExit::Lost(e.to_string());
            }
        }
        debug!(rooms = rooms.len(), "rooms re-joined after reconnect");
    }

    if let Some(frame) = unsent.take() {
        debug!("re-sending frame from the previous connection");
        if let Err(e) = transport.send(frame.clone()).await {
            *unsent = Some(frame);
            return SessionExit::Lost(e.to_string());
        }
    }

    registry.set_status(ConnectionStatus::Connected);

    let silence_limit = handshake.heartbeat_deadline();
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                transport.close().await;
                return SessionExit::Shutdown;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(frame) => {
                    if let Err(e) = transport.send(frame.clone()).await {
                        *unsent = Some(frame);
                        return SessionExit::Lost(e.to_string());
                    }
                }
                // Every handle is gone; nothing can observe this channel anymore.
                None => {
                    transport.close().await;
                    return SessionExit::Shutdown;
                }
            },
            incoming = transport.recv() => {
                last_seen = Instant::now();
                let frame = match incoming {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => return SessionExit::Lost(e.to_string()),
                    None => return SessionExit::Lost("closed by server".into()),
                };
                match handle_frame(&frame, registry) {
                    FrameAction::Continue => {}
                    FrameAction::Reply(reply) => {
                        if let Err(e) = transport.send(reply).await {
                            return SessionExit::Lost(e.to_string());
                        }
                    }
                    FrameAction::Close(reason) => {
                        transport.close().await;
                        return SessionExit::Lost(reason);
                    }
                }
            }
            _ = tokio::time::sleep_until(last_seen + silence_limit) => {
                transport.close().await;
                return SessionExit::Lost("heartbeat timeout".into());
            }
        }
    }
}

fn handle_frame(frame: &str, registry: &Registry) -> FrameAction {
    let packet = match EnginePacket::decode(frame) {
        Ok(packet) => packet,
        Err(e) => {
            debug!(error = %e, "dropping malformed frame");
            return FrameAction::Continue;
        }
    };

    match packet {
        EnginePacket::Ping => match EnginePacket::Pong.encode() {
            Ok(pong) => FrameAction::Reply(pong),
            Err(e) => FrameAction::Close(e.to_string()),
        },
        EnginePacket::Message(SocketPacket::Event {
            namespace, name, ..
        }) if namespace != DEFAULT_NAMESPACE => {
            trace!(%namespace, event = %name, "ignoring event outside the default namespace");
            FrameAction::Continue
        }
        EnginePacket::Message(SocketPacket::Event { name, args, .. }) => {
            trace!(event = %name, "dispatching event");
            let payload = args.into_iter().next().unwrap_or(Value::Null);
            registry.dispatch(&name, &payload);
            FrameAction::Continue
        }
        EnginePacket::Message(SocketPacket::Disconnect { .. }) => {
            FrameAction::Close("server disconnected the socket".into())
        }
        EnginePacket::Message(SocketPacket::ConnectError { message, .. }) => {
            FrameAction::Close(message)
        }
        EnginePacket::Close => FrameAction::Close("server closed the session".into()),
        other => {
            trace!(?other, "ignoring packet");
            FrameAction::Continue
        }
    }
}
