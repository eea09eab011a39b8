use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use plexfetch_types::models::Principal;
use tracing::error;

use crate::error::ApiError;
use crate::session::AuthError;
use crate::state::{AppState, AppStateInner};

/// The raw bearer token of the current request, kept so logout can revoke it.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// `?token=` for clients that cannot set headers, such as `<img src>`.
fn query_token(req: &Request) -> Option<String> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|t| !t.is_empty())
}

async fn authenticate(state: &AppStateInner, token: String, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let sessions = state.sessions.clone();
    let lookup = token.clone();
    let principal = tokio::task::spawn_blocking(move || sessions.validate(&lookup))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed"))
        })??;

    req.extensions_mut().insert(principal);
    req.extensions_mut().insert(SessionToken(token));
    Ok(next.run(req).await)
}

/// Resolve `Authorization: Bearer <token>` to a `Principal` extension.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let token = bearer_token(&req).ok_or(ApiError::Auth(AuthError::NotFound))?;
    authenticate(&state, token, req, next).await
}

/// Like `require_auth`, but also accepts the token as a query parameter.
pub async fn require_auth_or_query_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req)
        .or_else(|| query_token(&req))
        .ok_or(ApiError::Auth(AuthError::NotFound))?;
    authenticate(&state, token, req, next).await
}

pub fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.is_admin() { Ok(()) } else { Err(ApiError::AdminRequired) }
}
