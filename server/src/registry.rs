//! Session membership bookkeeping.
//!
//! Owned by the relay actor; nothing else touches it, so every join, leave
//! and fan-out read for a session happens in one serialized sequence.

use std::collections::{BTreeSet, HashMap};

use sketchroom_shared::ClientId;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, BTreeSet<ClientId>>,
    membership: HashMap<ClientId, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyMember,
    /// The client was moved out of `previous` to satisfy the one session per
    /// client rule.
    Moved { previous: String },
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `client_id` to `session_id`, creating the session when needed.
    pub fn join(&mut self, session_id: &str, client_id: ClientId) -> JoinOutcome {
        let current = self.membership.get(&client_id).cloned();
        let previous = match current {
            Some(current) if current == session_id => return JoinOutcome::AlreadyMember,
            Some(_) => self.leave(client_id),
            None => None,
        };
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(client_id);
        self.membership.insert(client_id, session_id.to_string());
        match previous {
            Some(previous) => JoinOutcome::Moved { previous },
            None => JoinOutcome::Joined,
        }
    }

    /// Removes the client from whatever session it is in and returns that
    /// session id. The session itself is dropped once it has no members.
    pub fn leave(&mut self, client_id: ClientId) -> Option<String> {
        let session_id = self.membership.remove(&client_id)?;
        if let Some(members) = self.sessions.get_mut(&session_id) {
            members.remove(&client_id);
            if members.is_empty() {
                self.sessions.remove(&session_id);
            }
        }
        Some(session_id)
    }

    pub fn members(&self, session_id: &str) -> BTreeSet<ClientId> {
        self.sessions.get(session_id).cloned().unwrap_or_default()
    }

    pub fn members_ref(&self, session_id: &str) -> Option<&BTreeSet<ClientId>> {
        self.sessions.get(session_id)
    }

    pub fn session_of(&self, client_id: ClientId) -> Option<&str> {
        self.membership.get(&client_id).map(String::as_str)
    }

    pub fn contains_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
