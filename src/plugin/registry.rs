//! Inter-plugin method registry (§4.E step 4, "Inter-plugin call" in
//! §4.E): `map[plugin][method] -> callable`, populated at load time from
//! each plugin's exported methods.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::plugin::descriptor::Plugin;

/// `call(plugin, method, args)` runs on the caller's context; the registry
/// itself does no scheduling, matching "calls run on the caller's context"
/// in §4.E.
#[derive(Default)]
pub struct MethodRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin_name: impl Into<String>, instance: Arc<dyn Plugin>) {
        self.plugins.write().insert(plugin_name.into(), instance);
    }

    pub async fn call(&self, plugin: &str, method: &str, args: Value) -> Result<Value> {
        let instance = self
            .plugins
            .read()
            .get(plugin)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("plugin {plugin}")))?;

        instance
            .call(method, args)
            .await
            .map_err(|error| Error::NotFound(format!("plugin {plugin} method {method}: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl Plugin for Echo {
        async fn call(&self, function: &str, args: Value) -> anyhow::Result<Value> {
            if function == "fail" {
                anyhow::bail!("method not supported");
            }
            Ok(serde_json::json!({ "called": function, "args": args }))
        }
    }

    #[tokio::test]
    async fn call_dispatches_to_registered_plugin() {
        let registry = MethodRegistry::new();
        registry.register("echo", Arc::new(Echo));

        let result = registry.call("echo", "ping", serde_json::json!(1)).await.unwrap();
        assert_eq!(result["called"], "ping");
    }

    #[tokio::test]
    async fn call_to_unknown_plugin_is_not_found() {
        let registry = MethodRegistry::new();
        let err = registry.call("missing", "ping", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn plugin_failure_surfaces_as_not_found() {
        let registry = MethodRegistry::new();
        registry.register("echo", Arc::new(Echo));
        let err = registry.call("echo", "fail", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
