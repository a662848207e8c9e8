//! Artifact Store HTTP surface (§4.D, §4.G): content-addressed blob upload
//! and download, plus the append-only event log write/read endpoints that
//! back it with a structured audit trail.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::app::AppState;
use crate::artifact::{Event, PutOutcome, Triple};
use crate::auth::middleware::{LogReadScope, LogWriteScope};
use crate::error::Result;

pub fn make_router(state: AppState) -> Router {
    Router::new()
        .route("/artifacts", post(upload_artifact))
        .route("/artifacts/{sha1}", get(download_artifact))
        .route("/events", post(log_event).get(list_events))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    name: String,
}

/// `POST /api/log/artifacts` (`satop.log.write`, §4.G): the request body is
/// the raw bytes of the artifact; the filename travels as a `?name=`
/// query parameter since there is no multipart framing in scope here.
async fn upload_artifact(
    LogWriteScope(_user): LogWriteScope,
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Response> {
    let outcome = state.artifact_store.put(&body, &query.name).await?;
    Ok(match outcome {
        PutOutcome::Created(record) => {
            let location = format!("/api/log/artifacts/{}", record.sha1);
            (
                StatusCode::CREATED,
                [(header::LOCATION, location)],
                Json(record),
            )
                .into_response()
        }
        PutOutcome::AlreadyExists(record) => (StatusCode::OK, Json(record)).into_response(),
    })
}

/// `GET /api/log/artifacts/{sha1}` (`satop.log.read`, §4.G): raw bytes, or
/// `404` if the hash is unknown.
async fn download_artifact(
    LogReadScope(_user): LogReadScope,
    State(state): State<AppState>,
    Path(sha1): Path<String>,
) -> Result<Response> {
    let (_record, bytes) = state.artifact_store.get(&sha1).await?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

/// Append an event to the RDF-like event log (§4.D), guarded by the same
/// write scope as artifact upload: both are "append to the audit trail".
async fn log_event(
    LogWriteScope(_user): LogWriteScope,
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> Json<Vec<Triple>> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    Json(state.event_log.log_event(&event, now))
}

async fn list_events(LogReadScope(_user): LogReadScope, State(state): State<AppState>) -> Json<Vec<Triple>> {
    Json(state.event_log.snapshot())
}
