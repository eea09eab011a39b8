use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A local administrator account.
#[derive(Debug, Clone)]
pub struct AdminPrincipal {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub last_login: Option<DateTime<Utc>>,
}

/// A user who signed in through the upstream pin OAuth flow.
///
/// `upstream_token` is the token that was validated against the
/// administrator's server at login time. For a shared server this is the
/// share-scoped access token, never the account's own auth token.
#[derive(Debug, Clone)]
pub struct DelegatedPrincipal {
    pub id: String,
    pub plex_account_id: i64,
    pub username: String,
    pub email: Option<String>,
    pub upstream_token: Option<String>,
    pub home_server_url: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
}

/// An authenticated identity, resolved from a session token.
#[derive(Debug, Clone)]
pub enum Principal {
    Admin(AdminPrincipal),
    Delegated(DelegatedPrincipal),
}

impl Principal {
    pub fn id(&self) -> &str {
        match self {
            Self::Admin(admin) => &admin.id,
            Self::Delegated(user) => &user.id,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::Admin(admin) => &admin.username,
            Self::Delegated(user) => &user.username,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            Self::Admin(_) => PrincipalKind::Admin,
            Self::Delegated(_) => PrincipalKind::Delegated,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin(_))
    }

    /// The principal's own upstream token, if it carries one.
    pub fn upstream_token(&self) -> Option<&str> {
        match self {
            Self::Admin(_) => None,
            Self::Delegated(user) => user.upstream_token.as_deref().filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Admin,
    Delegated,
}

/// A stored bearer session. The raw token is never kept; only its digest.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub principal_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Administrator server configuration, read fresh on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSettings {
    pub server_url: Option<String>,
    pub server_token: Option<String>,
    pub server_machine_id: Option<String>,
    pub server_name: Option<String>,
}

/// The one (server URL, token) pair a request may use upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCredentials {
    pub server_url: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadLogEntry {
    pub id: i64,
    pub principal_id: String,
    pub media_title: String,
    pub media_key: String,
    pub file_size: Option<u64>,
    pub downloaded_at: DateTime<Utc>,
}
