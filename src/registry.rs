//! Server-side room registry: client↔room mapping, main-channel invariant,
//! membership transitions (spec §3, §4.4).
//!
//! Both views (`members_by_client`, `clients_by_room`) live behind a
//! single lock so a reader never observes them out of sync — spec §5
//! calls this out explicitly ("never acquire the registry lock while
//! holding a write-queue lock"; lock order is registry < write_queue <
//! device).

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

/// The persistent room every client starts and ends up in.
pub const MAIN_ROOM: &str = "main";

struct Inner {
    members_by_client: HashMap<String, String>,
    clients_by_room: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn new() -> Self {
        let mut clients_by_room = HashMap::new();
        clients_by_room.insert(MAIN_ROOM.to_string(), HashSet::new());
        Self { members_by_client: HashMap::new(), clients_by_room }
    }

    /// Remove `client_id` from whatever room it currently occupies,
    /// deleting that room if it becomes empty and isn't `main`.
    fn remove_from_current_room(&mut self, client_id: &str) {
        if let Some(room) = self.members_by_client.remove(client_id) {
            if let Some(members) = self.clients_by_room.get_mut(&room) {
                members.remove(client_id);
                if members.is_empty() && room != MAIN_ROOM {
                    self.clients_by_room.remove(&room);
                }
            }
        }
    }

    fn insert_into_room(&mut self, client_id: &str, room: &str) {
        self.clients_by_room.entry(room.to_string()).or_default().insert(client_id.to_string());
        self.members_by_client.insert(client_id.to_string(), room.to_string());
    }
}

pub struct RoomRegistry {
    inner: Mutex<Inner>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::new()) }
    }

    /// Place a newly connected client into `main`.
    pub fn connect(&self, client_id: &str) {
        let mut inner = self.inner.lock();
        inner.insert_into_room(client_id, MAIN_ROOM);
    }

    /// Apply a JOIN transition. An empty `room_id` resolves to `main`.
    /// Joining the client's current room is a membership no-op (still
    /// reported SUCCESS by the caller). Returns the resolved room id.
    pub fn join(&self, client_id: &str, room_id: &str) -> String {
        let target = if room_id.is_empty() { MAIN_ROOM } else { room_id };
        let mut inner = self.inner.lock();
        if inner.members_by_client.get(client_id).map(String::as_str) == Some(target) {
            return target.to_string();
        }
        inner.remove_from_current_room(client_id);
        inner.insert_into_room(client_id, target);
        target.to_string()
    }

    /// Apply a LEAVE transition: symmetric to `join(client_id, "main")`. A
    /// client with no current room (should never happen by invariant) is
    /// simply placed into `main`.
    pub fn leave(&self, client_id: &str) -> String {
        self.join(client_id, MAIN_ROOM)
    }

    /// Remove a disconnecting client entirely — no re-insertion anywhere.
    pub fn disconnect(&self, client_id: &str) {
        let mut inner = self.inner.lock();
        inner.remove_from_current_room(client_id);
    }

    pub fn count_connected(&self) -> usize {
        self.inner.lock().members_by_client.len()
    }

    pub fn count_in_room(&self, room_id: &str) -> usize {
        self.inner.lock().clients_by_room.get(room_id).map_or(0, HashSet::len)
    }

    pub fn room_of(&self, client_id: &str) -> Option<String> {
        self.inner.lock().members_by_client.get(client_id).cloned()
    }

    /// Snapshot of a room's members, taken under the lock. Callers (the
    /// dispatch engine's fan-out) iterate the returned `Vec` outside the
    /// lock, tolerating concurrent membership changes mid-iteration.
    pub fn members_of(&self, room_id: &str) -> Vec<String> {
        self.inner.lock().clients_by_room.get(room_id).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// `(room_id, sorted members)` for every room, sorted by room id, used
    /// to render the LIST_ROOMS reply deterministically.
    pub fn snapshot(&self) -> Vec<(String, Vec<String>)> {
        let inner = self.inner.lock();
        let mut rooms: Vec<(String, Vec<String>)> = inner
            .clients_by_room
            .iter()
            .map(|(room, members)| {
                let mut members: Vec<String> = members.iter().cloned().collect();
                members.sort();
                (room.clone(), members)
            })
            .collect();
        rooms.sort_by(|a, b| a.0.cmp(&b.0));
        rooms
    }
}
