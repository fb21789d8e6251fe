//! In-memory call room state manager.
//!
//! A room is the two-party association created for one call attempt. The room
//! table and the user→room index are guarded by one mutex: creation and
//! destruction are atomic with respect to every membership lookup, so a
//! handler can never observe a destroyed room or a dangling index entry.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Phase of the call a room carries. `Ringing` starts at creation; `Connected`
/// starts when the callee's answer is forwarded. There is no terminal phase —
/// an ended room is removed outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Ringing,
    Connected,
}

/// Error type for room creation.
#[derive(Debug, PartialEq, Eq)]
pub enum RoomError {
    CallerBusy,
    CalleeBusy,
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomError::CallerBusy => write!(f, "You are already in a call"),
            RoomError::CalleeBusy => write!(f, "User is busy"),
        }
    }
}

/// Error type for room lookups performed on behalf of a user.
#[derive(Debug, PartialEq, Eq)]
pub enum RoomLookupError {
    RoomNotFound,
    NotAMember,
}

impl std::fmt::Display for RoomLookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomLookupError::RoomNotFound => write!(f, "Room not found"),
            RoomLookupError::NotAMember => write!(f, "You are not a member of this room"),
        }
    }
}

/// Snapshot returned by [`RoomManager::lookup`]: the other participant and the
/// call phase at the time of the lookup.
#[derive(Debug, Clone)]
pub struct Membership {
    pub peer: String,
    pub phase: CallPhase,
}

#[derive(Debug)]
struct Room {
    members: [String; 2],
    phase: CallPhase,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct RoomTables {
    rooms: HashMap<String, Room>,
    user_rooms: HashMap<String, String>,
}

/// Owner of all live call rooms. A user is in at most one room at a time.
#[derive(Default)]
pub struct RoomManager {
    inner: Mutex<RoomTables>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Ringing` room for a caller/callee pair and index both users.
    ///
    /// Fails if either user already has a room: a user is in at most one call,
    /// and a second call attempt must never silently merge into the first.
    pub fn create_room(&self, caller: &str, callee: &str) -> Result<String, RoomError> {
        let mut tables = self.inner.lock().expect("room lock poisoned");
        if tables.user_rooms.contains_key(caller) {
            return Err(RoomError::CallerBusy);
        }
        if tables.user_rooms.contains_key(callee) {
            return Err(RoomError::CalleeBusy);
        }

        let room_id = Uuid::new_v4().to_string();
        tables.rooms.insert(
            room_id.clone(),
            Room {
                members: [caller.to_string(), callee.to_string()],
                phase: CallPhase::Ringing,
                created_at: Utc::now(),
            },
        );
        tables
            .user_rooms
            .insert(caller.to_string(), room_id.clone());
        tables
            .user_rooms
            .insert(callee.to_string(), room_id.clone());
        Ok(room_id)
    }

    /// Resolve the other participant and current phase for a member's room.
    pub fn lookup(&self, room_id: &str, user_id: &str) -> Result<Membership, RoomLookupError> {
        let tables = self.inner.lock().expect("room lock poisoned");
        let room = tables
            .rooms
            .get(room_id)
            .ok_or(RoomLookupError::RoomNotFound)?;
        let peer = other_of(&room.members, user_id).ok_or(RoomLookupError::NotAMember)?;
        Ok(Membership {
            peer: peer.to_string(),
            phase: room.phase,
        })
    }

    /// The other participant of a room, without requiring membership of the
    /// caller. Rooms hold exactly two members, so this is total for members.
    pub fn other_member(&self, room_id: &str, user_id: &str) -> Option<String> {
        let tables = self.inner.lock().expect("room lock poisoned");
        let room = tables.rooms.get(room_id)?;
        other_of(&room.members, user_id).map(|s| s.to_string())
    }

    /// Room the user is currently a member of, if any.
    pub fn room_of(&self, user_id: &str) -> Option<String> {
        let tables = self.inner.lock().expect("room lock poisoned");
        tables.user_rooms.get(user_id).cloned()
    }

    /// Move a ringing room to `Connected`. No-op if the room is gone.
    pub fn set_connected(&self, room_id: &str) {
        let mut tables = self.inner.lock().expect("room lock poisoned");
        if let Some(room) = tables.rooms.get_mut(room_id) {
            room.phase = CallPhase::Connected;
        }
    }

    /// Remove a room and both index entries. Safe on an already-destroyed id.
    /// Returns the former members so callers can release per-room state.
    pub fn destroy_room(&self, room_id: &str) -> Option<[String; 2]> {
        let mut tables = self.inner.lock().expect("room lock poisoned");
        let room = tables.rooms.remove(room_id)?;
        for member in &room.members {
            // Only clear index entries still pointing at this room.
            if tables.user_rooms.get(member).map(String::as_str) == Some(room_id) {
                tables.user_rooms.remove(member);
            }
        }
        Some(room.members)
    }
}

fn other_of<'a>(members: &'a [String; 2], user_id: &str) -> Option<&'a str> {
    if members[0] == user_id {
        Some(members[1].as_str())
    } else if members[1] == user_id {
        Some(members[0].as_str())
    } else {
        None
    }
}
