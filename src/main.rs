//! Process entry point: bootstrap (§4.B config, §4.C token secret, §4.E
//! plugin engine, §4.D/§4.F/§4.G state), then hand control to
//! `Lifecycle::run`, which publishes `satop.startup`, serves the HTTP
//! surface until a shutdown signal arrives, and publishes `satop.shutdown`
//! (§4.E closing paragraph, §5: the HTTP server drains before the event bus
//! publishes `satop.shutdown`).

#[macro_use]
extern crate tracing;

use std::sync::Arc;

use parking_lot::RwLock;

use satop_gateway::app::AppState;
use satop_gateway::artifact::record::InMemoryArtifactRecordStore;
use satop_gateway::artifact::{ArtifactStore, EventLog};
use satop_gateway::auth::store::InMemoryAuthStore;
use satop_gateway::auth::{self, TokenAuthority, UsedScopes};
use satop_gateway::config::{data_path, Config};
use satop_gateway::event_bus::EventBus;
use satop_gateway::gs::registry::GsRegistry;
use satop_gateway::gs::terminal::TerminalRegistry;
use satop_gateway::plugin::{PluginEngine, PluginLoader};
use satop_gateway::{http, log};

const DEFAULT_SERVER_CONFIG: &str = include_str!("../config/server.yaml");

/// Exit code `1`: bootstrap failure (§6) — missing/unreadable token secret,
/// a dependency cycle in the plugin DAG, a cycle or multi-root component in
/// the target graph, or a failure to bind the HTTP listener.
fn main() -> anyhow::Result<()> {
    log::init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start the tokio runtime");

    if let Err(error) = runtime.block_on(run()) {
        error!(error = format!("{error:#}"), "bootstrap failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let secret = auth::secret::load_or_generate()?;
    let token_authority = Arc::new(TokenAuthority::new(&secret));

    let server_config = Config::load("server", DEFAULT_SERVER_CONFIG)?;
    let bind_addr: String = server_config.get("bind_addr").unwrap_or_else(|| "127.0.0.1:8080".to_owned());

    let bus = EventBus::new();

    // Bundled plugins would normally ship alongside the binary; only the
    // per-`data_root` directory is guaranteed to exist (§6 persisted state
    // layout). Discovery silently skips directories that don't exist yet.
    let plugin_dirs = vec![data_path("plugins")];

    // Actual plugin instantiation is out of this core's correctness scope
    // (§1): the embedder supplies a loader that knows how to turn a
    // manifest into a running `Plugin`. Absent one, every discovered
    // plugin fails to load and is excluded from startup (§4.E step 4), not
    // a fatal error.
    let plugin_loader: &PluginLoader = &|manifest, _data_dir| {
        anyhow::bail!(
            "no plugin loader configured for plugin {:?}: plugin business logic is out of this core's scope",
            manifest.name
        )
    };

    let engine = PluginEngine::bootstrap(&plugin_dirs, bus.clone(), Arc::clone(&token_authority), plugin_loader)?;

    let providers = engine.authentication_providers();
    for plugin in engine.http_route_plugins() {
        debug!(
            plugin = %plugin.name,
            "plugin declares http.add_routes; mounting its sub-router is the embedder's responsibility"
        );
    }

    let artifact_store = Arc::new(ArtifactStore::new(Box::new(InMemoryArtifactRecordStore::new())));

    let state = AppState {
        bus,
        token_authority,
        auth_store: Arc::new(InMemoryAuthStore::new()),
        used_scopes: Arc::new(UsedScopes::new()),
        artifact_store,
        event_log: Arc::new(EventLog::new()),
        gs_registry: Arc::new(GsRegistry::new()),
        terminals: Arc::new(TerminalRegistry::new()),
        plugin_methods: Arc::new(engine.registry),
        providers: Arc::new(RwLock::new(providers)),
    };

    let router = http::make_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "listening");

    engine
        .lifecycle
        .run(async move {
            if let Err(error) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await {
                error!(%error, "HTTP server error");
            }
        })
        .await;

    Ok(())
}

/// Resolves once SIGINT/Ctrl+C or (on Unix) SIGTERM arrives, so
/// `with_graceful_shutdown` stops accepting new connections and lets
/// in-flight requests finish before `Lifecycle::run` publishes
/// `satop.shutdown`.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install the Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install the SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining HTTP server");
}
