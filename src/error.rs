//! Crate-wide error taxonomy (see spec §7) and its HTTP projection.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors that cross a component boundary and must be translated to an HTTP
/// response at the edge, per §7.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("expired token")]
    ExpiredToken,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::MissingCredentials | Error::InvalidCredentials | Error::InvalidToken(_) | Error::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }
            Error::InsufficientPermissions => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    details: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        if matches!(self, Error::Internal(_)) {
            error!(error = format!("{self:#}"), "internal error");
        } else {
            debug!(error = %self, "request rejected");
        }

        let body = ErrorBody {
            error: status.canonical_reason().unwrap_or("error").to_owned(),
            details: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = core::result::Result<T, Error>;
