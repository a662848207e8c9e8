//! GS Connector HTTP/WebSocket surface (§4.F, §4.G). Control calls are a
//! thin layer over [`crate::gs::session::GroundstationSession::send_control`];
//! the WebSocket routes just upgrade and hand off to the already-complete
//! duplex loops in [`crate::gs::ws`].

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::middleware::{AuthUser, AuthUserPresent, GsOperateScope, GsTerminalScope};
use crate::error::{Error, Result};
use crate::gs::protocol::{ContentFrame, FramedContent, OutboundPayload, ProxyHeader};
use crate::gs::registry::GsSummary;
use crate::gs::terminal::TerminalSummary;
use crate::gs::ws;

pub fn make_router(state: AppState) -> Router {
    Router::new()
        .route("/stations", get(list_stations))
        .route("/stations/{id}/control", post(control))
        .route("/stations/{id}/control_framed", post(control_framed))
        .route("/stations/{id}/terminals", get(list_terminals))
        .route("/ws", get(gs_socket))
        .route("/terminal/{gs_id}/{term_id}", get(terminal_socket))
        .with_state(state)
}

/// `GET /api/gs/stations` (§4.G): login only, no scope requirement beyond
/// being an authenticated caller.
async fn list_stations(_user: AuthUserPresent, State(state): State<AppState>) -> Json<Vec<GsSummary>> {
    Json(state.gs_registry.list())
}

fn proxy_header(user: &AuthUser) -> ProxyHeader {
    ProxyHeader {
        origin: "http control".to_owned(),
        authenticated_user: user.userid,
    }
}

fn session_for(state: &AppState, id: Uuid) -> Result<std::sync::Arc<crate::gs::session::GroundstationSession>> {
    state
        .gs_registry
        .get(id)
        .ok_or_else(|| Error::NotFound(format!("groundstation {id}")))
}

/// `POST /api/gs/stations/{id}/control` (§4.F step "happy path control"):
/// forwards `body` verbatim as the control payload's `data`.
async fn control(
    GsOperateScope(user): GsOperateScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    let session = session_for(&state, id)?;
    let data = session
        .send_control(OutboundPayload::Dict(body), Some(proxy_header(&user.0)))
        .await?;
    Ok(Json(data))
}

#[derive(Debug, serde::Deserialize)]
struct FramedBody {
    #[serde(default)]
    frames: Vec<Value>,
    #[serde(flatten)]
    header_data: Value,
}

/// `POST /api/gs/stations/{id}/control_framed` (§4.F "Framed control
/// endpoint"): `frames` become content frames (always JSON over HTTP, since
/// there is no transport here for raw text/binary framing); the remaining
/// fields become the header data.
async fn control_framed(
    GsOperateScope(user): GsOperateScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<FramedBody>,
) -> Result<Json<Value>> {
    let session = session_for(&state, id)?;
    let framed = FramedContent {
        header_data: body.header_data,
        frames: body.frames.into_iter().map(ContentFrame::Json).collect(),
    };
    let data = session
        .send_control(OutboundPayload::Framed(framed), Some(proxy_header(&user.0)))
        .await?;
    Ok(Json(data))
}

/// Terminal discovery (§4.G): lists the terminals currently open on a GS.
async fn list_terminals(
    GsTerminalScope(_user): GsTerminalScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<Vec<TerminalSummary>> {
    Json(state.terminals.list_for_session(id))
}

/// `WS /api/gs/ws` (§4.G, §6): the hello handshake happens inside the
/// handshake itself once upgraded, not via an axum extractor — a
/// groundstation authenticates by presenting a token in its hello frame,
/// not an `Authorization` header (it is not an HTTP client in the usual
/// sense).
async fn gs_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> axum::response::Response {
    ws.on_upgrade(move |socket| {
        ws::handle_gs_socket(socket, state.gs_registry.clone(), state.terminals.clone(), state.token_authority.clone())
    })
}

/// `WS /api/gs/terminal/{gs_id}/{term_id}` (§4.G): same reasoning — the
/// operator authenticates via `connect_ro`/`connect_rw` hello, in-band.
async fn terminal_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((gs_id, term_id)): Path<(Uuid, String)>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| {
        ws::handle_terminal_socket(
            socket,
            gs_id,
            term_id,
            state.gs_registry.clone(),
            state.terminals.clone(),
            state.token_authority.clone(),
        )
    })
}
