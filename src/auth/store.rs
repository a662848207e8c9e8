//! Persistent store interface for entities, roles, and authentication
//! identifiers. The real persistence driver (a key/value table over an
//! embedded relational store) is out of scope for this core per §1/§2 — this
//! module defines the interface the rest of the Auth Core depends on and
//! ships an in-memory implementation used by tests and as a development
//! fallback.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::auth::entity::{AuthenticationIdentifier, Entity, EntityUpdate, NewEntity};
use crate::error::{Error, Result};

/// CRUD over entities, role→scope associations, and authentication
/// identifiers. Implementations must uphold: `id` immutability (§3),
/// `(role, scope)` uniqueness, and `(provider_key, identity)` global
/// uniqueness.
#[async_trait::async_trait]
pub trait AuthStore: Send + Sync {
    async fn create_entity(&self, new: NewEntity) -> Result<Entity>;
    async fn get_entity(&self, id: Uuid) -> Result<Entity>;
    async fn update_entity(&self, id: Uuid, update: EntityUpdate) -> Result<Entity>;
    async fn delete_entity(&self, id: Uuid) -> Result<()>;
    async fn list_entities(&self) -> Result<Vec<Entity>>;

    /// Scopes assigned directly to `role` (no `*` expansion: expansion is
    /// done at check time per §4.C).
    async fn get_role_scopes(&self, role: &str) -> Result<HashSet<String>>;

    /// Replaces the scope set for `role` with `scopes`, applying the minimal
    /// set of inserts/deletes to get there (§4.C: "recompute the diff").
    async fn set_role_scopes(&self, role: &str, scopes: HashSet<String>) -> Result<()>;

    /// Union of scopes over all of `entity_id`'s assigned roles.
    async fn get_entity_scopes(&self, entity_id: Uuid) -> Result<HashSet<String>>;

    async fn create_authentication_identifier(&self, identifier: AuthenticationIdentifier) -> Result<()>;
    async fn find_entity_by_identifier(&self, provider_key: &str, identity: &str) -> Result<Option<Uuid>>;
}

#[derive(Default)]
struct InMemoryState {
    entities: HashMap<Uuid, Entity>,
    role_scopes: HashMap<String, HashSet<String>>,
    identifiers: HashMap<(String, String), Uuid>,
}

/// In-memory `AuthStore`, useful for tests and as a drop-in before a real
/// driver is wired up. A single `parking_lot::RwLock` guards all tables:
/// consistency is per-call, matching the "no multi-entity invariants cross
/// transactions" note in §5.
pub struct InMemoryAuthStore {
    state: RwLock<InMemoryState>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(InMemoryState::default()),
        }
    }
}

impl Default for InMemoryAuthStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AuthStore for InMemoryAuthStore {
    async fn create_entity(&self, new: NewEntity) -> Result<Entity> {
        let entity = Entity {
            id: Uuid::new_v4(),
            name: new.name,
            kind: new.kind,
            roles: new.roles,
        };
        self.state.write().entities.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn get_entity(&self, id: Uuid) -> Result<Entity> {
        self.state
            .read()
            .entities
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))
    }

    async fn update_entity(&self, id: Uuid, update: EntityUpdate) -> Result<Entity> {
        let mut state = self.state.write();
        let entity = state
            .entities
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))?;

        if let Some(name) = update.name {
            entity.name = name;
        }
        if let Some(roles) = update.roles {
            entity.roles = roles;
        }

        Ok(entity.clone())
    }

    async fn delete_entity(&self, id: Uuid) -> Result<()> {
        self.state
            .write()
            .entities
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        Ok(self.state.read().entities.values().cloned().collect())
    }

    async fn get_role_scopes(&self, role: &str) -> Result<HashSet<String>> {
        Ok(self.state.read().role_scopes.get(role).cloned().unwrap_or_default())
    }

    async fn set_role_scopes(&self, role: &str, scopes: HashSet<String>) -> Result<()> {
        // Diff-apply against the current set, even though the in-memory
        // backend could just overwrite: real backends (§4.C) must compute
        // minimal inserts/deletes, so the interface is exercised the same
        // way here.
        let mut state = self.state.write();
        let current = state.role_scopes.entry(role.to_owned()).or_default();
        let to_remove: Vec<String> = current.difference(&scopes).cloned().collect();
        let to_add: Vec<String> = scopes.difference(current).cloned().collect();
        for scope in to_remove {
            current.remove(&scope);
        }
        for scope in to_add {
            current.insert(scope);
        }
        Ok(())
    }

    async fn get_entity_scopes(&self, entity_id: Uuid) -> Result<HashSet<String>> {
        let state = self.state.read();
        let entity = state
            .entities
            .get(&entity_id)
            .ok_or_else(|| Error::NotFound(format!("entity {entity_id}")))?;

        let mut scopes = HashSet::new();
        for role in &entity.roles {
            if let Some(role_scopes) = state.role_scopes.get(role) {
                scopes.extend(role_scopes.iter().cloned());
            }
        }
        Ok(scopes)
    }

    async fn create_authentication_identifier(&self, identifier: AuthenticationIdentifier) -> Result<()> {
        let mut state = self.state.write();
        let key = (identifier.provider_key.clone(), identifier.identity.clone());
        if state.identifiers.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "identifier ({}, {}) already exists",
                identifier.provider_key, identifier.identity
            )));
        }
        state.identifiers.insert(key, identifier.entity_id);
        Ok(())
    }

    async fn find_entity_by_identifier(&self, provider_key: &str, identity: &str) -> Result<Option<Uuid>> {
        let key = (provider_key.to_owned(), identity.to_owned());
        Ok(self.state.read().identifiers.get(&key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::entity::EntityKind;

    #[tokio::test]
    async fn set_role_scopes_applies_minimal_diff() {
        let store = InMemoryAuthStore::new();
        store
            .set_role_scopes("admin", ["a.b".to_owned(), "a.c".to_owned()].into_iter().collect())
            .await
            .unwrap();
        store
            .set_role_scopes("admin", ["a.c".to_owned(), "a.d".to_owned()].into_iter().collect())
            .await
            .unwrap();

        let scopes = store.get_role_scopes("admin").await.unwrap();
        assert_eq!(scopes, ["a.c".to_owned(), "a.d".to_owned()].into_iter().collect());
    }

    #[tokio::test]
    async fn entity_scopes_are_union_over_roles() {
        let store = InMemoryAuthStore::new();
        store
            .set_role_scopes("operator", ["scheduling.*".to_owned()].into_iter().collect())
            .await
            .unwrap();
        store
            .set_role_scopes("auditor", ["satop.log.read".to_owned()].into_iter().collect())
            .await
            .unwrap();

        let entity = store
            .create_entity(NewEntity {
                name: "alice".to_owned(),
                kind: EntityKind::Person,
                roles: vec!["operator".to_owned(), "auditor".to_owned()],
            })
            .await
            .unwrap();

        let scopes = store.get_entity_scopes(entity.id).await.unwrap();
        assert!(scopes.contains("scheduling.*"));
        assert!(scopes.contains("satop.log.read"));
    }

    #[tokio::test]
    async fn duplicate_identifier_is_conflict() {
        let store = InMemoryAuthStore::new();
        let id = Uuid::new_v4();
        let identifier = AuthenticationIdentifier {
            provider_key: "local".to_owned(),
            identity: "alice".to_owned(),
            entity_id: id,
        };
        store.create_authentication_identifier(identifier.clone()).await.unwrap();
        let err = store.create_authentication_identifier(identifier).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
