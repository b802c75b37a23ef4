//! Per-connection outbound handle.
//!
//! The socket itself is owned by the connection's writer task; the registry
//! only ever holds a `Transport`, a bounded queue feeding that task. Once the
//! writer stops (socket closed), every further send reports `Closed`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use uuid::Uuid;

/// Identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Why a send to a peer did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("send timed out")]
    Timeout,
}

/// Non-owning send handle to a connection's writer task.
#[derive(Debug, Clone)]
pub struct Transport {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
}

impl Transport {
    /// Create a transport for a fresh connection, returning the receiving end
    /// the writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueue one serialized record, waiting at most `timeout` for room.
    pub async fn send(&self, payload: Arc<str>, timeout: Duration) -> Result<(), SendError> {
        self.tx
            .send_timeout(payload, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SendError::Timeout,
                SendTimeoutError::Closed(_) => SendError::Closed,
            })
    }
}
