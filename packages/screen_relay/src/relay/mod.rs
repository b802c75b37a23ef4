//! Host/viewer relay
//!
//! The relay brokers two streams between endpoints that never talk directly:
//! screen frames flow host → viewers, control commands flow viewer → host.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<Relay>
//!               ┌──────────────────────────────┐
//!               │ registry: RwLock<Registry> { │
//!               │   hosts, viewers,            │
//!               │   rooms: host → {viewers},   │
//!               │   owners: conn → {ids}       │
//!               │ }                            │
//!               │ stats: RelayStats            │
//!               └──────────────┬───────────────┘
//!                              │
//!        ┌─────────────────────┼──────────────────────┐
//!        ▼                     ▼                      ▼
//!     [Host conn]          [Viewer conn]          [Viewer conn]
//!   screen_frame ──► record_frame() ──► fan_out() ──► Transport ──► socket
//!     socket ◄── Transport ◄── command_target() ◄── control_command
//! ```
//!
//! Registry state is only touched inside short synchronous critical sections;
//! no lock is held while awaiting a send. Each send is bounded by the
//! configured timeout, and fan-out sends run concurrently so one stalled
//! viewer never holds up the rest of its room.

mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod rooms;
mod router;
pub mod transport;

pub use lifecycle::ConnectionGuard;
pub use protocol::{ClientMessage, HostSummary, ServerMessage};
pub use registry::{HostEntry, Registry, ViewerEntry};
pub use rooms::RoomDirectory;
pub use transport::{ConnectionId, SendError, Transport};

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::config::RelayConfig;
use crate::metrics::RelayStats;

/// Shared relay state, one per server process.
pub struct Relay {
    registry: RwLock<Registry>,
    stats: Arc<RelayStats>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_stats(config, Arc::new(RelayStats::new()))
    }

    pub fn with_stats(config: RelayConfig, stats: Arc<RelayStats>) -> Self {
        Self {
            registry: RwLock::new(Registry::new()),
            stats,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Open a transport sized by the relay's queue configuration.
    pub fn open_transport(&self) -> (Transport, tokio::sync::mpsc::Receiver<Arc<str>>) {
        Transport::channel(self.config.send_queue_capacity)
    }

    pub async fn lookup_host(&self, host_id: &str) -> Option<HostEntry> {
        self.registry.read().await.lookup_host(host_id).cloned()
    }

    pub async fn lookup_viewer(&self, client_id: &str) -> Option<ViewerEntry> {
        self.registry.read().await.lookup_viewer(client_id).cloned()
    }

    pub async fn room_for(&self, host_id: &str) -> Vec<String> {
        self.registry.read().await.room_for(host_id)
    }

    /// `(hosts, viewers)` currently registered.
    pub async fn counts(&self) -> (usize, usize) {
        let registry = self.registry.read().await;
        (registry.host_count(), registry.viewer_count())
    }

    /// Snapshot of live hosts and lifetime stats, as sent for `get_hosts`.
    pub async fn hosts_list(&self) -> ServerMessage {
        let hosts = self.registry.read().await.summaries();
        ServerMessage::HostsList {
            hosts,
            server_stats: self.stats.server_stats(),
        }
    }

    /// Send one serialized record, counting the outcome.
    pub(crate) async fn deliver(
        &self,
        transport: &Transport,
        payload: Arc<str>,
    ) -> Result<(), SendError> {
        match transport.send(payload, self.config.send_timeout).await {
            Ok(()) => {
                self.stats.message_relayed();
                Ok(())
            }
            Err(e) => {
                self.stats.send_failed(e);
                warn!(conn_id = %transport.id(), error = %e, "Send failed");
                Err(e)
            }
        }
    }

    pub(crate) async fn reply(
        &self,
        transport: &Transport,
        msg: &ServerMessage,
    ) -> Result<(), SendError> {
        match encode(msg) {
            Some(payload) => self.deliver(transport, payload).await,
            None => Ok(()),
        }
    }

    /// Send `payload` to every target concurrently; returns the targets whose
    /// send failed.
    pub(crate) async fn fan_out(
        &self,
        targets: Vec<(String, Transport)>,
        payload: Arc<str>,
    ) -> Vec<(String, ConnectionId)> {
        let sends = targets.iter().map(|(_, transport)| {
            let payload = Arc::clone(&payload);
            async move { self.deliver(transport, payload).await }
        });
        let results = join_all(sends).await;

        targets
            .into_iter()
            .zip(results)
            .filter_map(|((client_id, transport), result)| {
                result.err().map(|_| (client_id, transport.id()))
            })
            .collect()
    }
}

pub(crate) fn encode(msg: &ServerMessage) -> Option<Arc<str>> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            None
        }
    }
}
