//! Auth Core HTTP surface (§4.B, §4.C, §4.G): token refresh, entity/role
//! CRUD, provider listing, and the used-scopes introspection endpoint.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::entity::{Entity, EntityUpdate, NewEntity, Provider};
use crate::auth::middleware::{
    EntitiesCreateScope, EntitiesDeleteScope, EntitiesReadScope, EntitiesUpdateScope, IntrospectionReadScope,
    ProvidersReadScope, RolesReadScope, RolesWriteScope,
};
use crate::error::{Error, Result};

pub fn make_router(state: AppState) -> Router {
    Router::new()
        .route("/refresh_token", post(refresh_token))
        .route("/entities", get(list_entities).post(create_entity))
        .route(
            "/entities/{id}",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
        .route("/roles/{role}/scopes", get(get_role_scopes).put(set_role_scopes))
        .route("/providers", get(list_providers))
        .route("/introspection/used-scopes", get(used_scopes))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct TokenPair {
    access_token: String,
    refresh_token: String,
}

/// `POST /api/auth/refresh_token` (§4.G): bearer carries the refresh token,
/// not an access token — it is parsed the same way but validated as
/// `TokenType::Refresh` by `TokenAuthority::refresh`, so this route does not
/// use the `AuthUser` extractor.
async fn refresh_token(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Result<Json<TokenPair>> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(Error::MissingCredentials)?
        .to_str()
        .map_err(|_| Error::InvalidToken("authorization header is not valid UTF-8".to_owned()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| Error::InvalidToken("authorization header is not a bearer token".to_owned()))?;

    let (access_token, refresh_token) = state.token_authority.refresh(token)?;
    Ok(Json(TokenPair { access_token, refresh_token }))
}

async fn list_entities(
    EntitiesReadScope(_user): EntitiesReadScope,
    State(state): State<AppState>,
) -> Result<Json<Vec<Entity>>> {
    Ok(Json(state.auth_store.list_entities().await?))
}

async fn create_entity(
    EntitiesCreateScope(_user): EntitiesCreateScope,
    State(state): State<AppState>,
    Json(new): Json<NewEntity>,
) -> Result<Json<Entity>> {
    Ok(Json(state.auth_store.create_entity(new).await?))
}

async fn get_entity(
    EntitiesReadScope(_user): EntitiesReadScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Entity>> {
    Ok(Json(state.auth_store.get_entity(id).await?))
}

async fn update_entity(
    EntitiesUpdateScope(_user): EntitiesUpdateScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<EntityUpdate>,
) -> Result<Json<Entity>> {
    Ok(Json(state.auth_store.update_entity(id, update).await?))
}

async fn delete_entity(
    EntitiesDeleteScope(_user): EntitiesDeleteScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode> {
    state.auth_store.delete_entity(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn get_role_scopes(
    RolesReadScope(_user): RolesReadScope,
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> Result<Json<Vec<String>>> {
    let mut scopes: Vec<String> = state.auth_store.get_role_scopes(&role).await?.into_iter().collect();
    scopes.sort();
    Ok(Json(scopes))
}

async fn set_role_scopes(
    RolesWriteScope(_user): RolesWriteScope,
    State(state): State<AppState>,
    Path(role): Path<String>,
    Json(scopes): Json<Vec<String>>,
) -> Result<axum::http::StatusCode> {
    let scopes: HashSet<String> = scopes.into_iter().collect();
    state.auth_store.set_role_scopes(&role, scopes).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `GET /api/auth/providers` (§4.G "provider listings"): the
/// runtime-registered authentication providers (§4.E step 4), rebuilt at
/// every plugin load.
async fn list_providers(ProvidersReadScope(_user): ProvidersReadScope, State(state): State<AppState>) -> Json<Vec<Provider>> {
    Json(state.providers.read().clone())
}

#[derive(Debug, Serialize)]
struct UsedScopeCount {
    scopes: Vec<String>,
    count: u64,
}

/// `GET /api/auth/introspection/used-scopes`: every distinct scope set
/// checked via a `scope_guard!` extractor so far, with how many times it
/// was checked.
async fn used_scopes(IntrospectionReadScope(_user): IntrospectionReadScope, State(state): State<AppState>) -> Json<Vec<UsedScopeCount>> {
    let snapshot = state
        .used_scopes
        .snapshot()
        .into_iter()
        .map(|(scopes, count)| UsedScopeCount { scopes, count })
        .collect();
    Json(snapshot)
}
