//! Room directory: host id → viewers currently watching it.
//!
//! Rooms are a derived index. The registry creates one alongside each host
//! and destroys it with the host; nothing here creates a room implicitly.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<String, BTreeSet<String>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Room identifier reported to a host on registration.
    pub fn room_id(host_id: &str) -> String {
        format!("room_{host_id}")
    }

    /// Open an empty room for `host_id`, discarding any previous membership.
    pub fn create_room(&mut self, host_id: &str) {
        self.rooms.insert(host_id.to_string(), BTreeSet::new());
    }

    pub fn contains(&self, host_id: &str) -> bool {
        self.rooms.contains_key(host_id)
    }

    /// Membership snapshot in fan-out order. Empty if the host is unknown.
    pub fn room_for(&self, host_id: &str) -> Vec<String> {
        self.rooms
            .get(host_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, host_id: &str) -> usize {
        self.rooms.get(host_id).map_or(0, BTreeSet::len)
    }

    /// Returns false when there is no room for `host_id`.
    pub fn add_member(&mut self, host_id: &str, viewer_id: &str) -> bool {
        match self.rooms.get_mut(host_id) {
            Some(members) => {
                members.insert(viewer_id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn remove_member(&mut self, host_id: &str, viewer_id: &str) {
        if let Some(members) = self.rooms.get_mut(host_id) {
            members.remove(viewer_id);
        }
    }

    /// Remove the room and hand back whoever was in it.
    pub fn destroy_room(&mut self, host_id: &str) -> Vec<String> {
        self.rooms
            .remove(host_id)
            .map(|members| members.into_iter().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> impl Iterator<Item = &String> {
        self.rooms.keys()
    }
}
