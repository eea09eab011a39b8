use axum::{Extension, Json, extract::State};
use tracing::{info, warn};
use url::Url;

use plexfetch_plex::PlexServer;
use plexfetch_types::api::{SettingsResponse, UpdateSettingsRequest};
use plexfetch_types::models::{Principal, ServerCredentials, ServerSettings};

use crate::error::ApiError;
use crate::middleware::require_admin;
use crate::state::AppState;

fn to_response(settings: &ServerSettings) -> SettingsResponse {
    SettingsResponse {
        server_url: settings.server_url.clone(),
        server_machine_id: settings.server_machine_id.clone(),
        server_name: settings.server_name.clone(),
        has_token: settings.server_token.as_deref().is_some_and(|t| !t.is_empty()),
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// GET /api/settings
pub async fn get_settings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<SettingsResponse>, ApiError> {
    require_admin(&principal)?;
    let settings = state.with_db(|db| db.get_server_settings()).await?;
    Ok(Json(to_response(&settings)))
}

/// PUT /api/settings
///
/// When no machine identifier is given it is read from the server's
/// `/identity`. If that lookup fails the settings are still saved, but
/// delegated logins stay unavailable until an identifier is known.
pub async fn update_settings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsResponse>, ApiError> {
    require_admin(&principal)?;

    let server_url = req.server_url.trim().trim_end_matches('/').to_string();
    let parsed = Url::parse(&server_url).map_err(|_| ApiError::BadRequest("server_url is not a valid URL".into()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ApiError::BadRequest("server_url must be an http(s) URL".into()));
    }
    let server_token = req.server_token.trim().to_string();
    if server_token.is_empty() {
        return Err(ApiError::BadRequest("server_token is required".into()));
    }

    let mut settings = ServerSettings {
        server_url: Some(server_url.clone()),
        server_token: Some(server_token.clone()),
        server_machine_id: optional(req.server_machine_id),
        server_name: optional(req.server_name),
    };

    if settings.server_machine_id.is_none() {
        let server = PlexServer::new(
            state.http.clone(),
            &ServerCredentials {
                server_url: server_url.clone(),
                token: server_token,
            },
        )?;
        match server.identity().await {
            Ok(identity) => {
                settings.server_machine_id = identity.machine_identifier;
                if settings.server_name.is_none() {
                    settings.server_name = identity.friendly_name;
                }
            }
            Err(e) => warn!("Could not read identity of {}: {}", server_url, e),
        }
    }

    let to_save = settings.clone();
    state.with_db(move |db| db.save_server_settings(&to_save)).await?;
    info!(
        machine_id = settings.server_machine_id.as_deref().unwrap_or("-"),
        "Media server set to {}",
        server_url
    );

    Ok(Json(to_response(&settings)))
}
