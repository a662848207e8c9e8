//! Plugin Engine (§4.E): discovery, dependency-ordered loading, the
//! inter-plugin method registry, and the target-graph lifecycle scheduler.

pub mod dependency;
pub mod descriptor;
pub mod discovery;
pub mod lifecycle;
pub mod registry;
pub mod targets;

use std::collections::HashMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::auth::entity::Provider;
use crate::auth::token::{AuthCallables, TokenAuthority};
use crate::config::data_path;
use crate::event_bus::EventBus;
pub use descriptor::{Plugin, PluginDescriptor, CAP_AUTHENTICATION_PROVIDER, CAP_HTTP_ADD_ROUTES};
use descriptor::PluginManifest;
pub use lifecycle::Lifecycle;
pub use registry::MethodRegistry;

/// Instantiates a discovered plugin (§4.E step 4). Out of the core's
/// correctness scope per §1 — supplied by the embedder, which owns the
/// actual plugin business logic.
pub type PluginLoader = dyn Fn(&PluginManifest, &Utf8Path) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync;

pub struct PluginEngine {
    pub descriptors: Vec<PluginDescriptor>,
    pub registry: MethodRegistry,
    pub lifecycle: Lifecycle,
}

impl PluginEngine {
    /// Runs discovery → dependency resolution → load → target-graph build,
    /// in that order, returning a fatal error only for the two cases §4.E
    /// calls out as fatal (dependency cycle, missing dependency) plus
    /// target-graph validation failures. Individual plugin load failures
    /// are caught per plugin and never abort the whole bootstrap.
    pub fn bootstrap(
        plugin_dirs: &[Utf8PathBuf],
        bus: EventBus,
        token_authority: Arc<TokenAuthority>,
        loader: &PluginLoader,
    ) -> anyhow::Result<Self> {
        let discovered = discovery::discover(plugin_dirs)?;

        let names_and_deps: Vec<(String, Vec<String>)> = discovered
            .iter()
            .map(|d| (d.manifest.name.clone(), d.manifest.dependencies.clone()))
            .collect();
        let load_order = dependency::topological_order(&names_and_deps)?;

        let mut by_name: HashMap<String, discovery::Discovered> =
            discovered.into_iter().map(|d| (d.manifest.name.clone(), d)).collect();

        let mut descriptors = Vec::with_capacity(load_order.len());
        for name in load_order {
            let discovered = by_name
                .remove(&name)
                .expect("load order is derived from the same discovered set");

            let plugin_data_dir = data_path("plugin_data").join(&name);

            let instance = match loader(&discovered.manifest, &plugin_data_dir) {
                Ok(instance) => Some(instance),
                Err(error) => {
                    warn!(plugin = %name, %error, "plugin failed to load, excluding from startup");
                    None
                }
            };

            descriptors.push(PluginDescriptor {
                name,
                package_path: discovered.package_path,
                config: discovered.manifest.config,
                dependencies: discovered.manifest.dependencies,
                capabilities: discovered.manifest.capabilities,
                targets: discovered.manifest.targets,
                instance,
            });
        }

        let registry = MethodRegistry::new();
        for descriptor in &descriptors {
            if let Some(instance) = &descriptor.instance {
                registry.register(descriptor.name.clone(), Arc::clone(instance));

                if descriptor.has_capability(CAP_AUTHENTICATION_PROVIDER) {
                    let callables = AuthCallables::new(provider_key_of(descriptor), Arc::clone(&token_authority));
                    instance.wire_authentication(callables);
                }
            }
        }

        // §4.E step 4: "Plugins whose load raises are removed from the load
        // order; this never aborts the whole startup." The target graph
        // (step 5) is built "for every plugin" over that post-removal set —
        // a failed-to-load plugin must not occupy a graph node, or a
        // `before`/`after` reference to it would wrongly resolve instead of
        // hitting `UnknownTarget`.
        let loaded: Vec<PluginDescriptor> = descriptors.iter().filter(|d| d.instance.is_some()).cloned().collect();
        let graph = targets::build(&loaded)?;
        let lifecycle = Lifecycle::new(bus, &descriptors);
        lifecycle.wire(&graph);

        Ok(Self {
            descriptors,
            registry,
            lifecycle,
        })
    }

    /// Plugins declaring `http.add_routes`; the HTTP surface mounts each
    /// one's sub-router (§4.E step 4; rejecting the capability for plugins
    /// that don't declare it is enforced by the caller only mounting what
    /// this returns).
    pub fn http_route_plugins(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.instance.is_some() && d.has_capability(CAP_HTTP_ADD_ROUTES))
    }

    pub fn authentication_provider_plugins(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.instance.is_some() && d.has_capability(CAP_AUTHENTICATION_PROVIDER))
    }

    /// The runtime `Provider` registrations (§3) contributed by every
    /// loaded `security.authentication_provider` plugin, for
    /// `AppState::providers` (§4.G "provider listings").
    pub fn authentication_providers(&self) -> Vec<Provider> {
        self.authentication_provider_plugins()
            .map(|d| Provider {
                provider_key: provider_key_of(d),
                identity_hint: d
                    .config
                    .get("identity_hint")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or(&d.name)
                    .to_owned(),
            })
            .collect()
    }
}

/// A plugin's configured `provider_key` (§3 `Provider`, §4.E step 4)
/// defaults to its own name when its `config.yaml` doesn't set one.
fn provider_key_of(descriptor: &PluginDescriptor) -> String {
    descriptor
        .config
        .get("provider_key")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(&descriptor.name)
        .to_owned()
}
