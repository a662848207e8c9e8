//! Process-wide ground station session registry (§3 `GroundstationSession`
//! ownership note, §5 "session registry ... are process-wide maps").
//! Registration/deregistration is serialized by the write lock; lookups take
//! a read lock and never hold it across an `await` on the returned session's
//! outbox (§5's locking discipline).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::gs::session::GroundstationSession;

#[derive(Default)]
pub struct GsRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<GroundstationSession>>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GsSummary {
    pub id: Uuid,
    pub name: String,
}

impl GsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<GroundstationSession>) {
        self.sessions.write().insert(session.id, session);
    }

    /// No-op if `id` is not currently registered (a session that already
    /// disconnected and was replaced by a newer one for the same id).
    pub fn deregister(&self, id: Uuid) {
        self.sessions.write().remove(&id);
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<GroundstationSession>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<GsSummary> {
        self.sessions
            .read()
            .values()
            .map(|s| GsSummary { id: s.id, name: s.name.clone() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_list_then_deregister() {
        let registry = GsRegistry::new();
        let (session, _rx) = GroundstationSession::new(Uuid::new_v4(), "gs-1".to_owned());
        let id = session.id;
        registry.register(Arc::new(session));

        assert_eq!(registry.list().len(), 1);
        assert!(registry.get(id).is_some());

        registry.deregister(id);
        assert!(registry.get(id).is_none());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn deregister_unknown_id_is_a_no_op() {
        let registry = GsRegistry::new();
        registry.deregister(Uuid::new_v4());
        assert!(registry.list().is_empty());
    }
}
