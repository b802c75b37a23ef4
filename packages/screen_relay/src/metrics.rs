//! Relay statistics
//!
//! Lifetime counters reported to clients in `hosts_list` replies, plus
//! operational counters exposed on `/metrics` for monitoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::relay::SendError;

/// Relay-wide counters. Every counter is monotonic except `active_connections`.
#[derive(Debug)]
pub struct RelayStats {
    // Lifetime totals reported in `hosts_list`
    /// Hosts ever registered
    pub total_hosts: AtomicU64,
    /// Viewers ever registered
    pub total_clients: AtomicU64,
    /// Successful sends to any transport, across all message types
    pub messages_processed: AtomicU64,

    // Connection metrics
    pub active_connections: AtomicU64,
    pub total_connections: AtomicU64,

    // Message metrics
    /// Text frames received from endpoints
    pub messages_received: AtomicU64,
    /// Screen frames discarded: unknown host or no payload
    pub frames_dropped: AtomicU64,
    /// Sends that found the peer's connection already closed
    pub send_failures: AtomicU64,
    /// Sends that did not complete within the configured timeout
    pub send_timeouts: AtomicU64,

    started_at: DateTime<Utc>,
    start_instant: Instant,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            total_hosts: AtomicU64::new(0),
            total_clients: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            send_timeouts: AtomicU64::new(0),
            started_at: Utc::now(),
            start_instant: Instant::now(),
        }
    }

    // Registration tracking
    pub fn host_registered(&self) {
        self.total_hosts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_registered(&self) {
        self.total_clients.fetch_add(1, Ordering::Relaxed);
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // saturating: a stray close must not wrap the gauge
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    // Message tracking
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_relayed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self, err: SendError) {
        match err {
            SendError::Closed => self.send_failures.fetch_add(1, Ordering::Relaxed),
            SendError::Timeout => self.send_timeouts.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_instant.elapsed().as_secs()
    }

    /// The subset of counters carried in `hosts_list` replies.
    pub fn server_stats(&self) -> ServerStats {
        ServerStats {
            total_hosts: self.total_hosts.load(Ordering::Relaxed),
            total_clients: self.total_clients.load(Ordering::Relaxed),
            messages_processed: self.messages_processed(),
            server_start_time: self.started_at.to_rfc3339(),
        }
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            server: self.server_stats(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                relayed: self.messages_processed(),
                frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                send_failures: self.send_failures.load(Ordering::Relaxed),
                send_timeouts: self.send_timeouts.load(Ordering::Relaxed),
            },
        }
    }
}

/// Lifetime totals as they appear on the wire (`server_stats`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    pub total_hosts: u64,
    pub total_clients: u64,
    pub messages_processed: u64,
    pub server_start_time: String,
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub server: ServerStats,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub relayed: u64,
    pub frames_dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub send_failures: u64,
    pub send_timeouts: u64,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub hosts: u64,
    pub clients: u64,
    pub connections: u64,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = RelayStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.server.total_hosts, 0);
        assert_eq!(snap.server.total_clients, 0);
        assert_eq!(snap.server.messages_processed, 0);
        assert_eq!(snap.connections.active, 0);
    }

    #[test]
    fn test_connections_never_go_negative() {
        let stats = RelayStats::new();
        stats.connection_opened();
        stats.connection_closed();
        stats.connection_closed();
        let snap = stats.snapshot();
        assert_eq!(snap.connections.active, 0);
        assert_eq!(snap.connections.total, 1);
    }

    #[test]
    fn test_send_failures_split_by_kind() {
        let stats = RelayStats::new();
        stats.send_failed(SendError::Closed);
        stats.send_failed(SendError::Timeout);
        stats.send_failed(SendError::Timeout);
        let snap = stats.snapshot();
        assert_eq!(snap.errors.send_failures, 1);
        assert_eq!(snap.errors.send_timeouts, 2);
    }

    #[test]
    fn test_server_stats_start_time_is_rfc3339() {
        let stats = RelayStats::new();
        let s = stats.server_stats();
        chrono::DateTime::parse_from_rfc3339(&s.server_start_time).unwrap();
    }
}
