use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::session::{ClientSession, SessionId};

/// The set of currently connected sessions.
///
/// Connection tasks add and remove concurrently with the broadcaster reading;
/// every operation is atomic per session and [`snapshot`](Self::snapshot)
/// never blocks a registration for longer than one shard lock.
#[derive(Default)]
pub struct ClientRegistry {
    sessions: DashMap<SessionId, ClientSession>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session`. Returns `false` (and changes nothing) if a session
    /// with the same id is already present.
    pub fn add(&self, session: ClientSession) -> bool {
        match self.sessions.entry(session.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Unregister `id`. Returns `false` if it was not present.
    pub fn remove(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Point-in-time copy of the membership. Later adds or removes do not
    /// affect the returned list.
    pub fn snapshot(&self) -> Vec<ClientSession> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// Drop every session. Each connection task sees its queue close and
    /// sends a Close frame. Returns how many sessions were removed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        let closed = ids.iter().filter(|id| self.remove(id)).count();
        debug!(closed, "registry drained");
        closed
    }
}
