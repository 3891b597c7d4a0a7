use std::collections::HashMap;

use super::{SessionHandle, SessionId};
use crate::db::models::UserId;

/// Live session per user id. At most one entry per user.
///
/// Not synchronized on its own; the hub keeps it behind the same lock as
/// [`super::membership::RoomMembership`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<UserId, SessionHandle>,
}

impl ConnectionRegistry {
    /// Register `session` for its user, returning the session it replaced.
    pub fn register(&mut self, session: SessionHandle) -> Option<SessionHandle> {
        self.sessions
            .insert(session.user_id().to_string(), session)
    }

    /// Remove the entry for `user_id`, but only if it still belongs to
    /// `session_id`. A newer session that already took the slot is kept.
    pub fn unregister(&mut self, user_id: &str, session_id: SessionId) -> bool {
        match self.sessions.get(user_id) {
            Some(current) if current.id() == session_id => {
                self.sessions.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, user_id: &str) -> Option<&SessionHandle> {
        self.sessions.get(user_id)
    }
}
