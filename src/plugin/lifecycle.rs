//! Ties the target graph to the event bus (§4.E step 5, closing paragraph):
//! `run()` publishes `satop.startup`, serves the HTTP surface, then
//! publishes `satop.shutdown` — decoupling plugin ordering from bootstrap
//! code, per §4.E.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::event_bus::EventBus;
use crate::plugin::descriptor::{Plugin, PluginDescriptor};
use crate::plugin::targets::{Component, TargetGraph, SHUTDOWN_ROOT, STARTUP_ROOT};

pub struct Lifecycle {
    bus: EventBus,
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl Lifecycle {
    pub fn new(bus: EventBus, descriptors: &[PluginDescriptor]) -> Self {
        let plugins = descriptors
            .iter()
            .filter_map(|d| d.instance.clone().map(|instance| (d.name.clone(), instance)))
            .collect();

        Self { bus, plugins }
    }

    /// Subscribes one callback per component root; publishing that root's
    /// topic runs the component's whole target sequence in order.
    pub fn wire(&self, graph: &TargetGraph) {
        for component in &graph.components {
            let sequence = component.clone();
            let plugins = self.plugins.clone();
            self.bus.subscribe(component.root.clone(), move |args| {
                run_sequence(&sequence, &plugins, args);
            });
        }
    }

    /// Runs `serve` (conventionally the HTTP server's own graceful-shutdown
    /// future) between the startup and shutdown publications.
    pub async fn run<F>(&self, serve: F)
    where
        F: std::future::Future<Output = ()>,
    {
        self.bus.publish(STARTUP_ROOT, &Value::Null);
        serve.await;
        self.bus.publish(SHUTDOWN_ROOT, &Value::Null);
    }
}

/// Every lifecycle target runs to completion, in the component's
/// topological order; no forced cancellation (§5). Bridges the event bus's
/// synchronous callback with each target's async `Plugin::call` via
/// `block_in_place`, which requires this to run on a multi-thread tokio
/// runtime (guaranteed by `main.rs`).
fn run_sequence(component: &Component, plugins: &HashMap<String, Arc<dyn Plugin>>, args: &Value) {
    for node in &component.sequence {
        let (Some(plugin_name), Some(function)) = (&node.plugin, &node.function) else {
            continue;
        };

        let Some(instance) = plugins.get(plugin_name) else {
            warn!(target = %node.id, plugin = %plugin_name, "lifecycle target has no loaded plugin instance, skipping");
            continue;
        };

        let instance = Arc::clone(instance);
        let function = function.clone();
        let args = args.clone();

        let result = tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(instance.call(&function, args)));

        if let Err(error) = result {
            error!(target = %node.id, %error, "lifecycle target failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::descriptor::TargetSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Plugin for Recorder {
        async fn call(&self, _function: &str, _args: Value) -> anyhow::Result<Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publishing_root_runs_every_target_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));

        let mut targets = HashMap::new();
        targets.insert(
            "startup".to_owned(),
            TargetSpec {
                function: Some("startup".to_owned()),
                before: Vec::new(),
                after: vec![STARTUP_ROOT.to_owned()],
            },
        );

        let descriptor = PluginDescriptor {
            name: "p".to_owned(),
            package_path: camino::Utf8PathBuf::from("/plugins/p"),
            config: Value::Null,
            dependencies: Vec::new(),
            capabilities: Vec::new(),
            targets,
            instance: Some(Arc::new(Recorder(Arc::clone(&calls)))),
        };

        let graph = crate::plugin::targets::build(&[descriptor.clone()]).unwrap();
        let bus = EventBus::new();
        let lifecycle = Lifecycle::new(bus.clone(), &[descriptor]);
        lifecycle.wire(&graph);

        lifecycle.run(async {}).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
