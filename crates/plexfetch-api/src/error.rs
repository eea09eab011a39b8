use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use plexfetch_plex::{DiscoveryError, PlexError};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::credentials::CredentialError;
use crate::session::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("the server owner does not allow downloading this item")]
    DownloadNotAllowed,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("media server unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Only ever logged: once bytes are flowing the client cannot be told.
    #[error("client disconnected")]
    ClientDisconnected,
}

/// Handler-facing error. Every variant maps to a status and a message that
/// is safe to show a client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Upstream(#[from] PlexError),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("administrator privileges required")]
    AdminRequired,

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(AuthError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Credential(CredentialError::ServerNotConfigured) => StatusCode::FORBIDDEN,
            Self::Credential(CredentialError::AccessDenied) => StatusCode::UNAUTHORIZED,
            Self::Discovery(_) => StatusCode::FORBIDDEN,
            Self::Permission(_) => StatusCode::FORBIDDEN,
            Self::Stream(_) => StatusCode::BAD_GATEWAY,
            Self::Upstream(PlexError::InvalidKey(_) | PlexError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
            Self::Upstream(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::AdminRequired => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            // Expired and unknown sessions look the same from outside.
            Self::Auth(AuthError::Store(_)) | Self::Internal(_) => "internal server error".into(),
            Self::Auth(_) => "invalid or expired session".into(),
            Self::Upstream(e) if e.is_not_found() => "not found".into(),
            Self::Upstream(PlexError::InvalidKey(_) | PlexError::InvalidPath(_)) => "invalid media key".into(),
            Self::Upstream(_) => "media server request failed".into(),
            Self::Stream(StreamError::UpstreamUnreachable(_)) => "media server unreachable".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        } else if status == StatusCode::FORBIDDEN {
            warn!("{}", self);
        } else {
            debug!("{}", self);
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
