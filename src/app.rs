//! Process-wide application state (§5 "Global state": "pass them via an
//! `App` context rather than module-level singletons"): the handles every
//! HTTP handler, WebSocket task, and lifecycle target needs, wired once at
//! startup in `main.rs` and cloned (cheaply — every field is an `Arc`) into
//! every axum handler.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::artifact::{ArtifactStore, EventLog};
use crate::auth::entity::Provider;
use crate::auth::middleware::AuthState;
use crate::auth::{AuthStore, TokenAuthority, UsedScopes};
use crate::event_bus::EventBus;
use crate::gs::registry::GsRegistry;
use crate::gs::terminal::TerminalRegistry;
use crate::plugin::MethodRegistry;

#[derive(Clone)]
pub struct AppState {
    pub bus: EventBus,
    pub token_authority: Arc<TokenAuthority>,
    pub auth_store: Arc<dyn AuthStore>,
    pub used_scopes: Arc<UsedScopes>,
    pub artifact_store: Arc<ArtifactStore>,
    pub event_log: Arc<EventLog>,
    pub gs_registry: Arc<GsRegistry>,
    pub terminals: Arc<TerminalRegistry>,
    /// Inter-plugin method registry (§4.E): exposed here so HTTP handlers
    /// can invoke plugin-exported methods the same way lifecycle targets do.
    pub plugin_methods: Arc<MethodRegistry>,
    /// Authentication-provider registrations (§3 `Provider`), rebuilt at
    /// every plugin load per §4.E step 4. Process-lived, never persisted.
    pub providers: Arc<RwLock<Vec<Provider>>>,
}

impl AuthState for AppState {
    fn token_authority(&self) -> &TokenAuthority {
        &self.token_authority
    }

    fn auth_store(&self) -> &dyn AuthStore {
        self.auth_store.as_ref()
    }

    fn used_scopes(&self) -> &UsedScopes {
        &self.used_scopes
    }
}
