//! Plugin descriptor (§3): everything the engine knows about one plugin,
//! whether or not it ever successfully loaded.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

pub const CAP_HTTP_ADD_ROUTES: &str = "http.add_routes";
pub const CAP_AUTHENTICATION_PROVIDER: &str = "security.authentication_provider";

/// A lifecycle step a plugin contributes to the target graph (§4.E step 5).
/// `function` defaults to the target's own name when absent (mirrors the
/// two synthesized defaults, `startup`/`shutdown`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetSpec {
    pub function: Option<String>,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
}

/// `config.yaml` as read off disk (§4.E step 1). `targets` is merged with
/// the two synthesized defaults at target-graph build time, not here.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub targets: HashMap<String, TargetSpec>,
    #[serde(default)]
    pub config: Value,
}

/// Business logic a loaded plugin exposes to the engine: exported
/// inter-plugin methods and lifecycle target functions, both invoked by
/// name. Actual plugin implementations (compilers, schedulers, storage
/// clients, auth providers, ...) are out of this core's scope per §1; this
/// trait is the seam the engine calls through.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    async fn call(&self, function: &str, args: Value) -> anyhow::Result<Value>;

    /// Called once after load, only for plugins declaring
    /// [`CAP_AUTHENTICATION_PROVIDER`] (§4.E step 4): hands the plugin the
    /// three callables it needs to mint/validate tokens against the Auth
    /// Core. Most plugins don't declare this capability, hence the no-op
    /// default.
    fn wire_authentication(&self, _callables: crate::auth::token::AuthCallables) {}
}

#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub package_path: camino::Utf8PathBuf,
    pub config: Value,
    pub dependencies: Vec<String>,
    pub capabilities: Vec<String>,
    pub targets: HashMap<String, TargetSpec>,
    /// Absent if discovery found the manifest but load (step 4) never ran
    /// or failed; such plugins are excluded from the rest of startup but
    /// kept around for introspection/logging.
    pub instance: Option<Arc<dyn Plugin>>,
}

impl PluginDescriptor {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("package_path", &self.package_path)
            .field("dependencies", &self.dependencies)
            .field("capabilities", &self.capabilities)
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .field("loaded", &self.instance.is_some())
            .finish()
    }
}
