use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::PrincipalKind;

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SetupStatus {
    pub configured: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: MeResponse,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: String,
    pub username: String,
    pub kind: PrincipalKind,
}

#[derive(Debug, Serialize)]
pub struct PinResponse {
    pub id: i64,
    pub code: String,
    pub auth_url: String,
}

/// Poll result for a pin. `session` is set once the pin was authorized
/// and the account was bound to the administrator's server.
#[derive(Debug, Serialize)]
pub struct PinStatusResponse {
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionResponse>,
}

// -- Settings --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSettingsRequest {
    pub server_url: String,
    pub server_token: String,
    pub server_machine_id: Option<String>,
    pub server_name: Option<String>,
}

/// Settings as shown to an administrator; the token is never echoed back.
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub server_url: Option<String>,
    pub server_machine_id: Option<String>,
    pub server_name: Option<String>,
    pub has_token: bool,
}

// -- Downloads --

#[derive(Debug, Serialize)]
pub struct DownloadHistoryResponse {
    pub entries: Vec<crate::models::DownloadLogEntry>,
}
