// =============================================================================
// SessionRegistry — concurrent map of active sessions (C7)
// =============================================================================
//
// Backed by `DashMap`, the pattern the wider example pack uses for exactly
// this "concurrent session/order tracking" shape. Reads (broadcast fan-out,
// lookup) are the common case; writes (create/delete) are rare — DashMap's
// sharded-lock design gives us that asymmetry without a single global
// RwLock becoming the bottleneck spec.md §5 warns against.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::SessionError;
use crate::session::Session;

pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Mutex<Session>>>,
    /// One primary human session per user (spec.md §4.4 invariant).
    primary_by_user: DashMap<Uuid, Uuid>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            primary_by_user: DashMap::new(),
        }
    }

    /// Insert a new session. If `user_id` is `Some`, it becomes that user's
    /// primary session unless one already exists.
    pub fn insert(&self, session: Session, user_id: Option<Uuid>) -> Result<(), SessionError> {
        if let Some(uid) = user_id {
            if self.primary_by_user.contains_key(&uid) {
                return Err(SessionError::PrimarySessionExists);
            }
        }
        let id = session.id;
        self.sessions.insert(id, Arc::new(Mutex::new(session)));
        if let Some(uid) = user_id {
            self.primary_by_user.insert(uid, id);
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(&id).map(|e| e.value().clone())
    }

    pub fn get_primary_for_user(&self, user_id: Uuid) -> Option<Arc<Mutex<Session>>> {
        let session_id = *self.primary_by_user.get(&user_id)?;
        self.get(session_id)
    }

    /// Idempotent: removing an unknown id is not an error.
    pub fn remove(&self, id: Uuid) {
        self.sessions.remove(&id);
        self.primary_by_user.retain(|_, sid| *sid != id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// A consistent snapshot of active session ids for broadcast fan-out
    /// (spec.md §4.4: "no torn views"). `DashMap::iter` holds per-shard
    /// locks only while visiting that shard, so collecting into a Vec here
    /// gives callers a stable list to iterate without holding any lock.
    pub fn snapshot_ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    pub fn all_sessions(&self) -> HashMap<Uuid, Arc<Mutex<Session>>> {
        self.sessions
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;
    use crate::price_engine::{Difficulty, RiskLevel};
    use crate::session::Config;
    use chrono::NaiveDate;

    fn new_session() -> Session {
        let cfg = Config::new(25_000.0, RiskLevel::Moderate, Difficulty::Medium, Mode::Classic, 0, true);
        Session::new(Uuid::new_v4(), None, cfg, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[test]
    fn insert_and_get_round_trips() {
        let registry = SessionRegistry::new();
        let session = new_session();
        let id = session.id;
        registry.insert(session, None).unwrap();
        assert!(registry.get(id).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = new_session();
        let id = session.id;
        registry.insert(session, None).unwrap();
        registry.remove(id);
        registry.remove(id);
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn second_primary_session_for_same_user_is_rejected() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        registry.insert(new_session(), Some(user)).unwrap();
        let err = registry.insert(new_session(), Some(user)).unwrap_err();
        assert_eq!(err, SessionError::PrimarySessionExists);
    }

    #[test]
    fn removing_primary_frees_the_user_slot() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let session = new_session();
        let id = session.id;
        registry.insert(session, Some(user)).unwrap();
        registry.remove(id);
        registry.insert(new_session(), Some(user)).unwrap();
    }

    #[test]
    fn snapshot_ids_is_consistent() {
        let registry = SessionRegistry::new();
        for _ in 0..5 {
            registry.insert(new_session(), None).unwrap();
        }
        assert_eq!(registry.snapshot_ids().len(), 5);
    }
}
