//! HTTP Surface (§4.G): a thin, dependency-injected adapter exposing the
//! contracts §4.G names over [`crate::app::AppState`]. One
//! `make_router(state) -> Router` per resource, nested under a top-level
//! router, plus a small CORS/tracing layer stack.

pub mod artifacts;
pub mod auth;
pub mod gs;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app::AppState;

/// Builds the full router mounted at `main.rs`'s bind point. Every
/// sub-router takes `AppState` directly (axum's `with_state` pattern), so
/// each resource module can be developed and tested independently of the
/// others.
pub fn make_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/auth", auth::make_router(state.clone()))
        .nest("/api/gs", gs::make_router(state.clone()))
        .nest("/api/log", artifacts::make_router(state.clone()))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
        .allow_origin(tower_http::cors::Any)
}
