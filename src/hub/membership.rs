use std::collections::HashMap;

use super::{SessionHandle, SessionId};
use crate::db::models::RoomId;

/// Which sessions are currently subscribed to which room.
///
/// A session belongs to at most one room; joining another room moves it.
/// Transient state only: persistent room membership lives in the store.
#[derive(Debug, Default)]
pub struct RoomMembership {
    rooms: HashMap<RoomId, HashMap<SessionId, SessionHandle>>,
    current: HashMap<SessionId, RoomId>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `session` to `room_id`, leaving its previous room first.
    /// Returns the room it left, if any (never `room_id` itself).
    pub fn join(&mut self, room_id: &str, session: SessionHandle) -> Option<RoomId> {
        let session_id = session.id();
        let previous = match self.current.get(&session_id) {
            Some(current) if current == room_id => None,
            Some(_) => self.leave_current(session_id),
            None => None,
        };

        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(session_id, session);
        self.current.insert(session_id, room_id.to_string());
        previous
    }

    /// Unsubscribe `session_id` from `room_id`. No-op when it is not a member.
    pub fn leave(&mut self, room_id: &str, session_id: SessionId) -> bool {
        if self.current.get(&session_id).map(String::as_str) != Some(room_id) {
            return false;
        }
        self.current.remove(&session_id);

        if let Some(members) = self.rooms.get_mut(room_id) {
            members.remove(&session_id);
            if members.is_empty() {
                self.rooms.remove(room_id);
            }
        }
        true
    }

    /// Unsubscribe `session_id` from whatever room it is in.
    pub fn leave_current(&mut self, session_id: SessionId) -> Option<RoomId> {
        let room_id = self.current.get(&session_id)?.clone();
        self.leave(&room_id, session_id);
        Some(room_id)
    }

    /// Snapshot of the sessions subscribed to `room_id`.
    pub fn members_of(&self, room_id: &str) -> Vec<SessionHandle> {
        self.rooms
            .get(room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_of(&self, session_id: SessionId) -> Option<&RoomId> {
        self.current.get(&session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::test_session;
    use std::collections::BTreeSet;

    fn member_ids(membership: &RoomMembership, room: &str) -> BTreeSet<SessionId> {
        membership.members_of(room).iter().map(|s| s.id()).collect()
    }

    #[test]
    fn test_join_moves_session_between_rooms() {
        let mut membership = RoomMembership::new();
        let (a, _rx) = test_session(1, "alice");

        assert_eq!(membership.join("r1", a.clone()), None);
        assert_eq!(membership.join("r2", a.clone()), Some("r1".to_string()));

        assert!(membership.members_of("r1").is_empty());
        assert_eq!(member_ids(&membership, "r2"), BTreeSet::from([1]));
        assert_eq!(membership.room_of(1).map(String::as_str), Some("r2"));

        // Re-joining the same room is not a move.
        assert_eq!(membership.join("r2", a), None);
        assert_eq!(member_ids(&membership, "r2"), BTreeSet::from([1]));
    }

    #[test]
    fn test_leave_non_member_is_noop() {
        let mut membership = RoomMembership::new();
        let (a, _rx1) = test_session(1, "alice");
        let (b, _rx2) = test_session(2, "bob");
        membership.join("r1", a);
        membership.join("r2", b);

        assert!(!membership.leave("r1", 2));
        assert!(!membership.leave("r3", 1));
        assert_eq!(member_ids(&membership, "r1"), BTreeSet::from([1]));
        assert_eq!(member_ids(&membership, "r2"), BTreeSet::from([2]));
    }

    #[test]
    fn test_members_match_last_operation_per_session() {
        let mut membership = RoomMembership::new();
        let sessions: Vec<_> = (1..=4)
            .map(|id| test_session(id, &format!("user{id}")))
            .collect();
        let handle = |id: u64| sessions[id as usize - 1].0.clone();

        membership.join("r1", handle(1));
        membership.join("r1", handle(2));
        membership.join("r1", handle(3));
        membership.leave("r1", 2);
        membership.join("r2", handle(3));
        membership.join("r1", handle(4));
        membership.leave("r1", 4);
        membership.join("r1", handle(4));

        assert_eq!(member_ids(&membership, "r1"), BTreeSet::from([1, 4]));
        assert_eq!(member_ids(&membership, "r2"), BTreeSet::from([3]));
        assert_eq!(membership.leave_current(1), Some("r1".to_string()));
        assert_eq!(membership.leave_current(1), None);
    }
}
