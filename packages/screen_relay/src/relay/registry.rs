//! Connection registry
//!
//! Authoritative record of which host and viewer ids are live, which
//! connection owns each one, and (through the room directory) which viewers
//! watch which host. `Registry` is plain data; the relay wraps it in a single
//! lock so every read-modify-write below is one critical section.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::DuplicateHostPolicy;
use crate::error::RelayError;

use super::protocol::HostSummary;
use super::rooms::RoomDirectory;
use super::transport::{ConnectionId, Transport};

#[derive(Debug, Clone)]
pub struct HostEntry {
    pub host_id: String,
    pub transport: Transport,
    pub connected_at: DateTime<Utc>,
    /// `None` until the first frame is relayed
    pub last_frame: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ViewerEntry {
    pub client_id: String,
    pub transport: Transport,
    /// Host this viewer registered against
    pub host_id: String,
    pub connected_at: DateTime<Utc>,
}

/// A host taken out of the registry together with the viewers that were
/// bound to it.
#[derive(Debug)]
pub struct RemovedHost {
    pub host: HostEntry,
    pub viewers: Vec<ViewerEntry>,
}

#[derive(Debug)]
pub enum HostRegistration {
    Created,
    /// The same connection registered the same id again; nothing changed.
    Unchanged,
    /// Another connection held the id and was evicted.
    Replaced(RemovedHost),
}

/// Everything a closed connection owned.
#[derive(Debug, Default)]
pub struct ConnectionCleanup {
    pub hosts: Vec<RemovedHost>,
    pub viewers: Vec<ViewerEntry>,
}

impl ConnectionCleanup {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.viewers.is_empty()
    }
}

/// Ids registered through one connection.
#[derive(Debug, Default)]
struct Owned {
    hosts: BTreeSet<String>,
    viewers: BTreeSet<String>,
}

impl Owned {
    fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.viewers.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    hosts: HashMap<String, HostEntry>,
    viewers: HashMap<String, ViewerEntry>,
    rooms: RoomDirectory,
    /// Reverse index so disconnect cleanup never scans the whole registry
    owners: HashMap<ConnectionId, Owned>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `host_id` on `transport` and open its room.
    pub fn register_host(
        &mut self,
        host_id: &str,
        transport: Transport,
        policy: DuplicateHostPolicy,
    ) -> Result<HostRegistration, RelayError> {
        if host_id.is_empty() {
            return Err(RelayError::MissingField("host_id"));
        }

        let existing = self.hosts.get(host_id).map(|h| h.transport.id());
        let replaced = match existing {
            Some(conn) if conn == transport.id() => return Ok(HostRegistration::Unchanged),
            Some(_) => match policy {
                DuplicateHostPolicy::Reject => {
                    return Err(RelayError::DuplicateId(host_id.to_string()));
                }
                DuplicateHostPolicy::Replace => self.remove_host(host_id),
            },
            None => None,
        };

        self.owners
            .entry(transport.id())
            .or_default()
            .hosts
            .insert(host_id.to_string());
        self.hosts.insert(
            host_id.to_string(),
            HostEntry {
                host_id: host_id.to_string(),
                transport,
                connected_at: Utc::now(),
                last_frame: None,
            },
        );
        self.rooms.create_room(host_id);

        Ok(match replaced {
            Some(removed) => HostRegistration::Replaced(removed),
            None => HostRegistration::Created,
        })
    }

    /// Register `client_id` as a viewer of `host_id`.
    ///
    /// Re-registering an existing id rebinds it. Returns every live host id.
    pub fn register_viewer(
        &mut self,
        client_id: &str,
        host_id: &str,
        transport: Transport,
    ) -> Result<Vec<String>, RelayError> {
        if client_id.is_empty() {
            return Err(RelayError::MissingField("client_id"));
        }
        if host_id.is_empty() {
            return Err(RelayError::MissingField("target_host"));
        }
        if !self.hosts.contains_key(host_id) {
            return Err(RelayError::UnknownHost(host_id.to_string()));
        }

        self.remove_viewer(client_id);

        self.owners
            .entry(transport.id())
            .or_default()
            .viewers
            .insert(client_id.to_string());
        self.viewers.insert(
            client_id.to_string(),
            ViewerEntry {
                client_id: client_id.to_string(),
                transport,
                host_id: host_id.to_string(),
                connected_at: Utc::now(),
            },
        );
        self.rooms.add_member(host_id, client_id);

        Ok(self.host_ids())
    }

    pub fn lookup_host(&self, host_id: &str) -> Option<&HostEntry> {
        self.hosts.get(host_id)
    }

    pub fn lookup_viewer(&self, client_id: &str) -> Option<&ViewerEntry> {
        self.viewers.get(client_id)
    }

    pub fn room_for(&self, host_id: &str) -> Vec<String> {
        self.rooms.room_for(host_id)
    }

    /// Live host ids, sorted.
    pub fn host_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.hosts.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Remove a host, its room, and every viewer bound to it.
    ///
    /// Absent ids are a no-op.
    pub fn remove_host(&mut self, host_id: &str) -> Option<RemovedHost> {
        let host = self.hosts.remove(host_id)?;
        self.disown_host(host.transport.id(), host_id);

        let members = self.rooms.destroy_room(host_id);
        let mut viewers = Vec::with_capacity(members.len());
        for client_id in members {
            if let Some(viewer) = self.viewers.remove(&client_id) {
                self.disown_viewer(viewer.transport.id(), &client_id);
                viewers.push(viewer);
            }
        }

        Some(RemovedHost { host, viewers })
    }

    /// Remove a host only if it is still registered through `conn`.
    ///
    /// Used after a failed send: the old connection may have been cleaned up
    /// and the id taken by a new host, which must survive.
    pub fn remove_host_on(&mut self, host_id: &str, conn: ConnectionId) -> Option<RemovedHost> {
        match self.hosts.get(host_id) {
            Some(h) if h.transport.id() == conn => self.remove_host(host_id),
            _ => None,
        }
    }

    /// Remove a viewer and its room membership. Absent ids are a no-op.
    pub fn remove_viewer(&mut self, client_id: &str) -> Option<ViewerEntry> {
        let viewer = self.viewers.remove(client_id)?;
        self.rooms.remove_member(&viewer.host_id, client_id);
        self.disown_viewer(viewer.transport.id(), client_id);
        Some(viewer)
    }

    /// Remove a viewer only if it is still registered through `conn`.
    ///
    /// Used after a failed send: the id may have re-registered elsewhere in
    /// the meantime and that newer binding must survive.
    pub fn remove_viewer_on(&mut self, client_id: &str, conn: ConnectionId) -> Option<ViewerEntry> {
        match self.viewers.get(client_id) {
            Some(v) if v.transport.id() == conn => self.remove_viewer(client_id),
            _ => None,
        }
    }

    /// Remove everything registered through `conn`.
    pub fn remove_connection(&mut self, conn: ConnectionId) -> ConnectionCleanup {
        let Some(owned) = self.owners.remove(&conn) else {
            return ConnectionCleanup::default();
        };

        let hosts = owned
            .hosts
            .iter()
            .filter_map(|host_id| self.remove_host(host_id))
            .collect();
        // a viewer bound to one of this connection's own hosts is already gone
        let viewers = owned
            .viewers
            .iter()
            .filter_map(|client_id| self.remove_viewer(client_id))
            .collect();

        ConnectionCleanup { hosts, viewers }
    }

    /// Stamp a frame on `host_id` and snapshot its room for fan-out.
    ///
    /// `None` if the host is not registered.
    pub fn record_frame(&mut self, host_id: &str) -> Option<Vec<(String, Transport)>> {
        let host = self.hosts.get_mut(host_id)?;
        host.last_frame = Some(Utc::now());

        let targets = self
            .rooms
            .room_for(host_id)
            .into_iter()
            .filter_map(|client_id| {
                let transport = self.viewers.get(&client_id)?.transport.clone();
                Some((client_id, transport))
            })
            .collect();
        Some(targets)
    }

    /// Resolve where a viewer's command should go.
    pub fn command_target(&self, client_id: &str, host_id: &str) -> Result<Transport, RelayError> {
        if !self.viewers.contains_key(client_id) {
            return Err(RelayError::UnknownClient(client_id.to_string()));
        }
        self.hosts
            .get(host_id)
            .map(|h| h.transport.clone())
            .ok_or_else(|| RelayError::UnknownHost(host_id.to_string()))
    }

    /// One row per live host, sorted by id.
    pub fn summaries(&self) -> Vec<HostSummary> {
        let mut rows: Vec<HostSummary> = self
            .hosts
            .values()
            .map(|h| HostSummary {
                host_id: h.host_id.clone(),
                connected_at: h.connected_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                last_frame: h
                    .last_frame
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true)),
                clients_connected: self.rooms.member_count(&h.host_id),
            })
            .collect();
        rows.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        rows
    }

    fn disown_host(&mut self, conn: ConnectionId, host_id: &str) {
        if let Some(owned) = self.owners.get_mut(&conn) {
            owned.hosts.remove(host_id);
            if owned.is_empty() {
                self.owners.remove(&conn);
            }
        }
    }

    fn disown_viewer(&mut self, conn: ConnectionId, client_id: &str) {
        if let Some(owned) = self.owners.get_mut(&conn) {
            owned.viewers.remove(client_id);
            if owned.is_empty() {
                self.owners.remove(&conn);
            }
        }
    }

    /// Panics if rooms, viewers and the reverse index disagree.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut room_keys: Vec<&String> = self.rooms.keys().collect();
        room_keys.sort();
        let mut host_keys: Vec<&String> = self.hosts.keys().collect();
        host_keys.sort();
        assert_eq!(room_keys, host_keys, "rooms must match hosts one-to-one");

        for host_id in self.hosts.keys() {
            let mut bound: Vec<String> = self
                .viewers
                .values()
                .filter(|v| &v.host_id == host_id)
                .map(|v| v.client_id.clone())
                .collect();
            bound.sort();
            assert_eq!(self.rooms.room_for(host_id), bound, "room {host_id} membership");
        }
        for viewer in self.viewers.values() {
            assert!(self.hosts.contains_key(&viewer.host_id), "dangling viewer");
        }

        for (conn, owned) in &self.owners {
            assert!(!owned.is_empty());
            for h in &owned.hosts {
                assert_eq!(self.hosts[h].transport.id(), *conn);
            }
            for v in &owned.viewers {
                assert_eq!(self.viewers[v].transport.id(), *conn);
            }
        }
        let owned_hosts: usize = self.owners.values().map(|o| o.hosts.len()).sum();
        let owned_viewers: usize = self.owners.values().map(|o| o.viewers.len()).sum();
        assert_eq!(owned_hosts, self.hosts.len());
        assert_eq!(owned_viewers, self.viewers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> Transport {
        Transport::channel(8).0
    }

    // ── registration ────────────────────────────────────────────────────

    #[test]
    fn register_host_creates_empty_room() {
        let mut reg = Registry::new();
        let result = reg
            .register_host("h1", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        assert!(matches!(result, HostRegistration::Created));
        assert!(reg.lookup_host("h1").is_some());
        assert!(reg.lookup_host("h1").unwrap().last_frame.is_none());
        assert!(reg.room_for("h1").is_empty());
        reg.assert_consistent();
    }

    #[test]
    fn register_host_rejects_empty_id() {
        let mut reg = Registry::new();
        assert_eq!(
            reg.register_host("", transport(), DuplicateHostPolicy::Reject)
                .unwrap_err(),
            RelayError::MissingField("host_id")
        );
    }

    #[test]
    fn duplicate_host_rejected_by_default_policy() {
        let mut reg = Registry::new();
        let first = transport();
        reg.register_host("h1", first.clone(), DuplicateHostPolicy::Reject)
            .unwrap();
        let err = reg
            .register_host("h1", transport(), DuplicateHostPolicy::Reject)
            .unwrap_err();
        assert_eq!(err, RelayError::DuplicateId("h1".into()));
        assert_eq!(reg.lookup_host("h1").unwrap().transport.id(), first.id());
    }

    #[test]
    fn same_connection_reregistering_is_unchanged() {
        let mut reg = Registry::new();
        let t = transport();
        reg.register_host("h1", t.clone(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_viewer("c1", "h1", transport()).unwrap();

        let result = reg
            .register_host("h1", t, DuplicateHostPolicy::Reject)
            .unwrap();
        assert!(matches!(result, HostRegistration::Unchanged));
        assert_eq!(reg.room_for("h1"), vec!["c1".to_string()]);
        reg.assert_consistent();
    }

    #[test]
    fn duplicate_host_replaced_evicts_viewers() {
        let mut reg = Registry::new();
        reg.register_host("h1", transport(), DuplicateHostPolicy::Replace)
            .unwrap();
        reg.register_viewer("c1", "h1", transport()).unwrap();

        let newcomer = transport();
        let result = reg
            .register_host("h1", newcomer.clone(), DuplicateHostPolicy::Replace)
            .unwrap();
        match result {
            HostRegistration::Replaced(removed) => {
                assert_eq!(removed.viewers.len(), 1);
                assert_eq!(removed.viewers[0].client_id, "c1");
            }
            other => panic!("Expected Replaced, got {:?}", other),
        }
        assert_eq!(reg.lookup_host("h1").unwrap().transport.id(), newcomer.id());
        assert!(reg.lookup_viewer("c1").is_none());
        assert!(reg.room_for("h1").is_empty());
        reg.assert_consistent();
    }

    #[test]
    fn register_viewer_against_unknown_host_fails() {
        let mut reg = Registry::new();
        let err = reg.register_viewer("c1", "ghost", transport()).unwrap_err();
        assert_eq!(err, RelayError::UnknownHost("ghost".into()));
        assert!(reg.lookup_viewer("c1").is_none());
        assert_eq!(reg.viewer_count(), 0);
        reg.assert_consistent();
    }

    #[test]
    fn register_viewer_missing_fields() {
        let mut reg = Registry::new();
        assert_eq!(
            reg.register_viewer("", "h1", transport()).unwrap_err(),
            RelayError::MissingField("client_id")
        );
        assert_eq!(
            reg.register_viewer("c1", "", transport()).unwrap_err(),
            RelayError::MissingField("target_host")
        );
    }

    #[test]
    fn register_viewer_lists_all_hosts() {
        let mut reg = Registry::new();
        reg.register_host("h2", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_host("h1", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        let hosts = reg.register_viewer("c1", "h2", transport()).unwrap();
        assert_eq!(hosts, vec!["h1".to_string(), "h2".to_string()]);
        assert_eq!(reg.room_for("h2"), vec!["c1".to_string()]);
        assert_eq!(reg.lookup_viewer("c1").unwrap().host_id, "h2");
    }

    #[test]
    fn reregistering_viewer_moves_rooms() {
        let mut reg = Registry::new();
        reg.register_host("h1", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_host("h2", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_viewer("c1", "h1", transport()).unwrap();
        reg.register_viewer("c1", "h2", transport()).unwrap();

        assert!(reg.room_for("h1").is_empty());
        assert_eq!(reg.room_for("h2"), vec!["c1".to_string()]);
        assert_eq!(reg.viewer_count(), 1);
        reg.assert_consistent();
    }

    // ── removal ─────────────────────────────────────────────────────────

    #[test]
    fn remove_host_cascades_to_viewers() {
        let mut reg = Registry::new();
        reg.register_host("h1", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_viewer("c1", "h1", transport()).unwrap();
        reg.register_viewer("c2", "h1", transport()).unwrap();

        let removed = reg.remove_host("h1").unwrap();
        let mut ids: Vec<_> = removed.viewers.iter().map(|v| v.client_id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);
        assert!(reg.lookup_host("h1").is_none());
        assert!(reg.lookup_viewer("c1").is_none());
        assert!(reg.room_for("h1").is_empty());
        reg.assert_consistent();
    }

    #[test]
    fn removal_is_idempotent() {
        let mut reg = Registry::new();
        reg.register_host("h1", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_viewer("c1", "h1", transport()).unwrap();

        assert!(reg.remove_viewer("c1").is_some());
        assert!(reg.remove_viewer("c1").is_none());
        assert!(reg.remove_host("h1").is_some());
        assert!(reg.remove_host("h1").is_none());
        assert_eq!(reg.host_count(), 0);
        reg.assert_consistent();
    }

    #[test]
    fn remove_viewer_on_ignores_newer_binding() {
        let mut reg = Registry::new();
        reg.register_host("h1", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        let old = transport();
        reg.register_viewer("c1", "h1", old.clone()).unwrap();
        let new = transport();
        reg.register_viewer("c1", "h1", new.clone()).unwrap();

        assert!(reg.remove_viewer_on("c1", old.id()).is_none());
        assert!(reg.lookup_viewer("c1").is_some());
        assert!(reg.remove_viewer_on("c1", new.id()).is_some());
        reg.assert_consistent();
    }

    #[test]
    fn remove_host_on_ignores_newer_binding() {
        let mut reg = Registry::new();
        let old = transport();
        reg.register_host("h1", old.clone(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.remove_connection(old.id());
        let new = transport();
        reg.register_host("h1", new.clone(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_viewer("c1", "h1", transport()).unwrap();

        assert!(reg.remove_host_on("h1", old.id()).is_none());
        assert_eq!(reg.lookup_host("h1").unwrap().transport.id(), new.id());
        assert_eq!(reg.room_for("h1"), vec!["c1".to_string()]);

        let removed = reg.remove_host_on("h1", new.id()).unwrap();
        assert_eq!(removed.viewers.len(), 1);
        reg.assert_consistent();
    }

    #[test]
    fn remove_connection_clears_both_roles() {
        let mut reg = Registry::new();
        let shared = transport();
        reg.register_host("h1", shared.clone(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_host("h2", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_viewer("c1", "h1", transport()).unwrap();
        // the host's own connection also watches another host
        reg.register_viewer("self", "h2", shared.clone()).unwrap();

        let cleanup = reg.remove_connection(shared.id());
        assert_eq!(cleanup.hosts.len(), 1);
        assert_eq!(cleanup.hosts[0].host.host_id, "h1");
        assert_eq!(cleanup.hosts[0].viewers.len(), 1);
        assert_eq!(cleanup.viewers.len(), 1);
        assert_eq!(cleanup.viewers[0].client_id, "self");

        assert!(reg.lookup_host("h2").is_some());
        assert!(reg.room_for("h2").is_empty());
        reg.assert_consistent();

        assert!(reg.remove_connection(shared.id()).is_empty());
    }

    // ── routing lookups ─────────────────────────────────────────────────

    #[test]
    fn record_frame_stamps_and_snapshots() {
        let mut reg = Registry::new();
        reg.register_host("h1", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_viewer("c1", "h1", transport()).unwrap();

        let targets = reg.record_frame("h1").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0, "c1");
        assert!(reg.lookup_host("h1").unwrap().last_frame.is_some());

        assert!(reg.record_frame("ghost").is_none());
    }

    #[test]
    fn command_target_checks_client_then_host() {
        let mut reg = Registry::new();
        let host = transport();
        reg.register_host("h1", host.clone(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_viewer("c1", "h1", transport()).unwrap();

        assert_eq!(reg.command_target("c1", "h1").unwrap().id(), host.id());
        assert_eq!(
            reg.command_target("nobody", "h1").unwrap_err(),
            RelayError::UnknownClient("nobody".into())
        );
        assert_eq!(
            reg.command_target("c1", "ghost").unwrap_err(),
            RelayError::UnknownHost("ghost".into())
        );
    }

    #[test]
    fn summaries_count_viewers() {
        let mut reg = Registry::new();
        reg.register_host("h1", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_host("h2", transport(), DuplicateHostPolicy::Reject)
            .unwrap();
        reg.register_viewer("c1", "h1", transport()).unwrap();
        reg.register_viewer("c2", "h1", transport()).unwrap();

        let rows = reg.summaries();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].host_id, "h1");
        assert_eq!(rows[0].clients_connected, 2);
        assert!(rows[0].last_frame.is_none());
        assert_eq!(rows[1].clients_connected, 0);
    }
}
