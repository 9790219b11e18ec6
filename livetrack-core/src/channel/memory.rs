//! In-process transport: the far end is driven by a [`MemoryPeer`], which
//! plays the backend in tests and offline runs.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::mpsc;

use super::transport::{Connector, Transport};
use crate::{
    error::ChannelError,
    protocol::{EnginePacket, Handshake, SocketPacket},
};

pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Arc<AtomicUsize>,
}

/// Accepting side of a [`MemoryConnector`].
pub struct MemoryServer {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    refusals: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn pair() -> (Self, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let refusals = Arc::new(AtomicUsize::new(0));
        (
            Self {
                peers: tx,
                refusals: refusals.clone(),
            },
            MemoryServer {
                peers: rx,
                refusals,
            },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ChannelError> {
        let refused = self
            .refusals
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ChannelError::ConnectionUnavailable(
                "connection refused".into(),
            ));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        self.peers
            .send(MemoryPeer {
                inbound: from_client,
                outbound: to_client,
            })
            .map_err(|_| ChannelError::ConnectionUnavailable("server is gone".into()))?;

        Ok(Box::new(MemoryTransport {
            tx: to_server,
            rx: from_server,
        }))
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::Release);
    }

    pub fn pending(&self) -> bool {
        !self.peers.is_empty()
    }
}

/// One accepted connection as seen by the backend.
pub struct MemoryPeer {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.outbound.send(frame.into()).is_ok()
    }

    /// Stop accepting client frames; later client writes fail.
    pub fn stop_reading(&mut self) {
        self.inbound.close();
    }

    /// Next raw frame written by the client.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Play the server side of the engine.io + socket.io handshake.
    pub async fn handshake(&mut self) -> bool {
        let open = EnginePacket::Open(Handshake {
            sid: "memory".into(),
            upgrades: Vec::new(),
            ping_interval: 25_000,
            ping_timeout: 20_000,
            max_payload: None,
        });
        let Ok(open) = open.encode() else {
            return false;
        };
        if !self.push(open) {
            return false;
        }
        match self.next_frame().await.as_deref() {
            Some("40") => self.push(r#"40{"sid":"memory-socket"}"#),
            _ => false,
        }
    }

    pub fn emit(&self, event: &str, data: Value) -> bool {
        match EnginePacket::Message(SocketPacket::event(event, Some(data))).encode() {
            Ok(frame) => self.push(frame),
            Err(_) => false,
        }
    }

    /// Next event emitted by the client, skipping heartbeat replies.
    pub async fn next_event(&mut self) -> Option<(String, Vec<Value>)> {
        loop {
            let frame = self.next_frame().await?;
            if let Ok(EnginePacket::Message(SocketPacket::Event { name, args, .. })) =
                EnginePacket::decode(&frame)
            {
                return Some((name, args));
            }
        }
    }
}

struct MemoryTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        self.tx
            .send(frame)
            .map_err(|_| ChannelError::Transport("peer closed".into()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
