//! Entities, roles, and authentication identifiers (§3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    System,
}

/// A principal with a stable `id`. `id` is immutable once created; every
/// other field is mutated only via the update API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Ordered set of role names; order is preserved but not semantically
    /// meaningful (scopes are a union over all assigned roles).
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityUpdate {
    pub name: Option<String>,
    pub roles: Option<Vec<String>>,
}

/// Triple `(provider_key, identity, entity_id)`. `(provider_key, identity)`
/// is globally unique; an entity may have many identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationIdentifier {
    pub provider_key: String,
    pub identity: String,
    pub entity_id: Uuid,
}

/// Runtime-only registration `(provider_key -> identity_hint)`. Not
/// persisted: it is rebuilt every time plugins with the
/// `security.authentication_provider` capability load (§4.E step 4).
#[derive(Debug, Clone, Serialize)]
pub struct Provider {
    pub provider_key: String,
    pub identity_hint: String,
}
