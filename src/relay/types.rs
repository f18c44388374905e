use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;

/// Relay errors. None of them are fatal to the server.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope has no string `id` field")]
    MissingId,

    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("send to {peer} failed: {source}")]
    Transport {
        peer: PeerId,
        #[source]
        source: SendError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure to enqueue a frame on one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("outbound queue full")]
    QueueFull,

    #[error("connection closed")]
    Disconnected,
}

/// Peer identity taken verbatim from the connection path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(PeerId)
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Serial number of an accepted socket. Distinguishes two sockets that
/// claimed the same peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Frame queued for one connection. Both variants are reference counted so
/// fan-out clones are O(1).
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(Utf8Bytes),
    Binary(Bytes),
}

impl Outbound {
    pub fn into_message(self) -> Message {
        match self {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Binary(data) => Message::Binary(data),
        }
    }
}

/// Close request delivered to the task that owns the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Close,
}

/// Sending side of one live connection.
///
/// Outbound frames go through a bounded queue. A full queue means the peer is
/// not keeping up: the connection is asked to close and the frame is dropped.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: async_channel::Sender<Outbound>,
    control: mpsc::UnboundedSender<Control>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        outbound: async_channel::Sender<Outbound>,
        control: mpsc::UnboundedSender<Control>,
    ) -> Self {
        Self {
            id,
            outbound,
            control,
        }
    }

    /// Creates a handle together with the receiving ends its owner drains
    pub fn channel(
        capacity: usize,
    ) -> (
        Self,
        async_channel::Receiver<Outbound>,
        mpsc::UnboundedReceiver<Control>,
    ) {
        let (outbound_tx, outbound_rx) = async_channel::bounded(capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handle = Self::new(ConnectionId::next(), outbound_tx, control_tx);
        (handle, outbound_rx, control_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send_text(&self, text: impl Into<Utf8Bytes>) -> Result<(), SendError> {
        self.send(Outbound::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        self.send(Outbound::Binary(data.into()))
    }

    pub fn send(&self, msg: Outbound) -> Result<(), SendError> {
        match self.outbound.try_send(msg) {
            Ok(()) => Ok(()),
            Err(async_channel::TrySendError::Full(_)) => {
                self.close();
                Err(SendError::QueueFull)
            }
            Err(async_channel::TrySendError::Closed(_)) => Err(SendError::Disconnected),
        }
    }

    /// Asks the owning task to close the socket. Idempotent.
    pub fn close(&self) {
        let _ = self.control.send(Control::Close);
    }

    /// Stops accepting frames. Frames already queued are still drained.
    pub fn close_queue(&self) {
        self.outbound.close();
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}
