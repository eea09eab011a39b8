use std::sync::LazyLock;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use plexfetch_db::models::PlexUserUpsert;
use plexfetch_plex::select_best_connection;
use plexfetch_types::api::{
    LoginRequest, MeResponse, PinResponse, PinStatusResponse, SessionResponse, SetupRequest, SetupStatus,
};
use plexfetch_types::models::Principal;

use crate::credentials::CredentialError;
use crate::error::ApiError;
use crate::middleware::SessionToken;
use crate::session::IssuedSession;
use crate::state::{AppState, AppStateInner, blocking};

pub fn me_of(principal: &Principal) -> MeResponse {
    MeResponse {
        id: principal.id().to_string(),
        username: principal.username().to_string(),
        kind: principal.kind(),
    }
}

fn session_response(issued: IssuedSession, principal: &Principal) -> SessionResponse {
    SessionResponse {
        token: issued.token,
        expires_at: issued.session.expires_at,
        user: me_of(principal),
    }
}

async fn issue_session(state: &AppStateInner, principal: &Principal) -> Result<SessionResponse, ApiError> {
    let sessions = state.sessions.clone();
    let id = principal.id().to_string();
    let issued = blocking(move || sessions.issue(&id)).await?;
    Ok(session_response(issued, principal))
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// Stand-in hash for unknown usernames, so a miss costs one Argon2 run too.
static UNKNOWN_USER_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("plexfetch-unknown-user").unwrap_or_default());

/// Runs a full verify whether or not the account exists.
fn password_matches(stored_hash: Option<&str>, password: &str) -> bool {
    let ok = verify_password(password, stored_hash.unwrap_or(UNKNOWN_USER_HASH.as_str()));
    ok && stored_hash.is_some()
}

// ── Setup ───────────────────────────────────────────────────────────────

/// GET /api/setup
pub async fn setup_status(State(state): State<AppState>) -> Result<Json<SetupStatus>, ApiError> {
    let admins = state.with_db(|db| db.admin_count()).await?;
    Ok(Json(SetupStatus { configured: admins > 0 }))
}

/// POST /api/setup: create the one administrator account.
pub async fn setup(
    State(state): State<AppState>,
    Json(req): Json<SetupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    if !(3..=32).contains(&username.chars().count()) {
        return Err(ApiError::BadRequest("username must be 3 to 32 characters".into()));
    }
    if req.password.chars().count() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }

    let id = Uuid::new_v4().to_string();
    let (admin_id, name) = (id.clone(), username.clone());
    let password = req.password;
    let created = state
        .with_db(move |db| {
            let hash = hash_password(&password)?;
            db.create_first_admin(&admin_id, &name, &hash)
        })
        .await?;
    if !created {
        return Err(ApiError::Conflict("setup has already been completed".into()));
    }

    let admin = state
        .with_db(move |db| db.get_admin_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("admin vanished after creation")))?;
    let principal = Principal::Admin(admin.into());
    info!("Administrator {} created", username);

    let session = issue_session(&state, &principal).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

// ── Admin login ─────────────────────────────────────────────────────────

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let username = req.username.trim().to_string();
    let password = req.password;
    let admin = state
        .with_db(move |db| {
            let admin = db.get_admin_by_username(&username)?;
            let stored_hash = admin.as_ref().map(|a| a.password_hash.as_str());
            if !password_matches(stored_hash, &password) {
                return Ok(None);
            }
            let Some(admin) = admin else { return Ok(None) };
            db.touch_admin_login(&admin.id, Utc::now().timestamp())?;
            Ok(Some(admin))
        })
        .await?;

    // Same answer for unknown user and wrong password.
    let Some(admin) = admin else {
        warn!("Failed admin login attempt");
        return Err(ApiError::InvalidCredentials);
    };

    let principal = Principal::Admin(admin.into());
    info!("Administrator {} logged in", principal.username());
    Ok(Json(issue_session(&state, &principal).await?))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> Result<StatusCode, ApiError> {
    let sessions = state.sessions.clone();
    blocking(move || sessions.revoke(&token.0)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/me
pub async fn me(Extension(principal): Extension<Principal>) -> Json<MeResponse> {
    Json(me_of(&principal))
}

// ── Pin OAuth ───────────────────────────────────────────────────────────

/// POST /api/auth/plex/pin
pub async fn start_pin(State(state): State<AppState>) -> Result<Json<PinResponse>, ApiError> {
    let pin = state.plex_tv.create_pin().await?;
    Ok(Json(PinResponse {
        auth_url: state.plex_tv.auth_url(&pin),
        id: pin.id,
        code: pin.code,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PinPollQuery {
    pub code: String,
}

/// GET /api/auth/plex/pin/{id}?code=
///
/// The code handed out with the pin must be presented again, so a pin id
/// alone is not enough to pick up somebody else's login. An approved pin
/// yields one session; polling it again afterwards is a conflict.
pub async fn poll_pin(
    State(state): State<AppState>,
    Path(pin_id): Path<i64>,
    Query(query): Query<PinPollQuery>,
) -> Result<Json<PinStatusResponse>, ApiError> {
    let pin = state.plex_tv.check_pin(pin_id).await?;
    if pin.code != query.code {
        return Err(ApiError::NotFound);
    }
    if state.consumed_pins.is_consumed(pin_id).await {
        return Err(ApiError::Conflict("pin has already been used".into()));
    }
    let Some(auth_token) = pin.auth_token else {
        return Ok(Json(PinStatusResponse {
            authorized: false,
            session: None,
        }));
    };

    let principal = complete_delegated_login(&state, &auth_token).await?;
    if !state.consumed_pins.claim(pin_id).await {
        warn!(pin_id, "Pin was exchanged by a concurrent poll");
        return Err(ApiError::Conflict("pin has already been used".into()));
    }
    let session = issue_session(&state, &principal).await?;
    Ok(Json(PinStatusResponse {
        authorized: true,
        session: Some(session),
    }))
}

/// Bind an approved upstream account to the administrator's server and
/// store the token that is valid for that server.
pub async fn complete_delegated_login(state: &AppStateInner, auth_token: &str) -> Result<Principal, ApiError> {
    let settings = state.with_db(|db| db.get_server_settings()).await?;
    let target = match (&settings.server_url, &settings.server_machine_id) {
        (Some(_), Some(machine_id)) => machine_id.clone(),
        _ => return Err(CredentialError::ServerNotConfigured.into()),
    };

    let account = state.plex_tv.account(auth_token).await?;
    let candidates = state.plex_tv.list_accessible_servers(auth_token).await?;
    let selected = select_best_connection(&candidates, Some(&target), auth_token).map_err(|e| {
        warn!(account = %account.username, "Delegated login refused: {}", e);
        e
    })?;

    let new_id = Uuid::new_v4().to_string();
    let username = account.username.clone();
    let user_id = state
        .with_db(move |db| {
            db.upsert_plex_user(
                &new_id,
                &PlexUserUpsert {
                    plex_account_id: account.id,
                    username: &account.username,
                    email: account.email.as_deref(),
                    upstream_token: &selected.access_token,
                    home_server_url: Some(&selected.server_url),
                },
                Utc::now().timestamp(),
            )
        })
        .await?;

    let user = state
        .with_db(move |db| db.get_plex_user_by_id(&user_id))
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("delegated user vanished after upsert")))?;
    info!("Delegated user {} signed in", username);
    Ok(Principal::Delegated(user.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("anything", "not a hash"));
    }

    #[test]
    fn unknown_user_is_checked_against_a_real_hash() {
        assert!(PasswordHash::new(UNKNOWN_USER_HASH.as_str()).is_ok());
        assert!(!password_matches(None, "plexfetch-unknown-user"));
        assert!(!password_matches(None, "anything"));

        let hash = hash_password("correct horse").unwrap();
        assert!(password_matches(Some(&hash), "correct horse"));
        assert!(!password_matches(Some(&hash), "wrong horse"));
    }
}
