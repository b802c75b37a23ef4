//! Removal and disconnect cleanup.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::registry::RemovedHost;
use super::transport::ConnectionId;
use super::{Relay, ServerMessage, encode};

impl Relay {
    /// Remove a host and every viewer bound to it, telling those viewers the
    /// host is gone. Returns false if the host was not registered.
    pub async fn remove_host(&self, host_id: &str) -> bool {
        let removed = self.registry.write().await.remove_host(host_id);
        match removed {
            Some(removed) => {
                info!(host_id = %host_id, viewers = removed.viewers.len(), "Host removed");
                self.notify_host_disconnected(removed).await;
                true
            }
            None => false,
        }
    }

    /// Like [`Relay::remove_host`], but only while `host_id` is still owned by
    /// `conn`.
    pub async fn remove_host_on(&self, host_id: &str, conn: ConnectionId) -> bool {
        let removed = self.registry.write().await.remove_host_on(host_id, conn);
        match removed {
            Some(removed) => {
                info!(host_id = %host_id, conn_id = %conn, viewers = removed.viewers.len(), "Host removed");
                self.notify_host_disconnected(removed).await;
                true
            }
            None => false,
        }
    }

    /// Remove a viewer from the registry and its room. Returns false if the
    /// viewer was not registered.
    pub async fn remove_viewer(&self, client_id: &str) -> bool {
        let removed = self.registry.write().await.remove_viewer(client_id);
        if let Some(viewer) = &removed {
            info!(client_id = %client_id, host_id = %viewer.host_id, "Client removed");
        }
        removed.is_some()
    }

    /// Drop every registration made through `conn`.
    pub async fn cleanup_connection(&self, conn: ConnectionId) {
        let cleanup = self.registry.write().await.remove_connection(conn);
        if cleanup.is_empty() {
            return;
        }

        for viewer in &cleanup.viewers {
            info!(client_id = %viewer.client_id, conn_id = %conn, "Client disconnected");
        }
        for removed in cleanup.hosts {
            info!(
                host_id = %removed.host.host_id,
                conn_id = %conn,
                viewers = removed.viewers.len(),
                "Host disconnected"
            );
            self.notify_host_disconnected(removed).await;
        }
    }

    /// Best-effort `host_disconnected` to the viewers that lost their host.
    pub(crate) async fn notify_host_disconnected(&self, removed: RemovedHost) {
        if removed.viewers.is_empty() {
            return;
        }
        let Some(payload) = encode(&ServerMessage::host_disconnected(&removed.host.host_id)) else {
            return;
        };
        let targets = removed
            .viewers
            .into_iter()
            .map(|v| (v.client_id, v.transport))
            .collect();
        let failed = self.fan_out(targets, payload).await;
        if !failed.is_empty() {
            debug!(
                host_id = %removed.host.host_id,
                failed = failed.len(),
                "Some viewers missed host_disconnected"
            );
        }
    }
}

/// Ties a connection's registrations to its lifetime.
///
/// Call [`ConnectionGuard::finish`] when the connection ends. If the guard is
/// dropped without it (the task panicked or was cancelled), cleanup is
/// spawned onto the current runtime instead.
pub struct ConnectionGuard {
    relay: Arc<Relay>,
    conn_id: ConnectionId,
    armed: bool,
}

impl ConnectionGuard {
    pub fn new(relay: Arc<Relay>, conn_id: ConnectionId) -> Self {
        relay.stats.connection_opened();
        Self {
            relay,
            conn_id,
            armed: true,
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub async fn finish(mut self) {
        self.armed = false;
        self.relay.cleanup_connection(self.conn_id).await;
        self.relay.stats.connection_closed();
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let relay = Arc::clone(&self.relay);
        let conn_id = self.conn_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    relay.cleanup_connection(conn_id).await;
                    relay.stats.connection_closed();
                });
            }
            Err(_) => {
                warn!(conn_id = %conn_id, "No runtime available for connection cleanup");
                relay.stats.connection_closed();
            }
        }
    }
}
