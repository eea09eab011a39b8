//! Database row types. These map directly to SQLite rows and stay distinct
//! from the plexfetch-types models to keep the DB layer independent.

use chrono::{DateTime, Utc};
use plexfetch_types::models::{AdminPrincipal, DelegatedPrincipal, DownloadLogEntry, Session};

pub struct AdminRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub last_login: Option<i64>,
}

pub struct PlexUserRow {
    pub id: String,
    pub plex_account_id: i64,
    pub username: String,
    pub email: Option<String>,
    pub upstream_token: Option<String>,
    pub home_server_url: Option<String>,
    pub last_login: Option<i64>,
}

/// Input for creating or refreshing a delegated user on OAuth login.
pub struct PlexUserUpsert<'a> {
    pub plex_account_id: i64,
    pub username: &'a str,
    pub email: Option<&'a str>,
    pub upstream_token: &'a str,
    pub home_server_url: Option<&'a str>,
}

pub struct SessionRow {
    pub id: String,
    pub principal_id: String,
    pub token_hash: String,
    pub created_at: i64,
    pub expires_at: i64,
}

pub struct DownloadLogRow {
    pub id: i64,
    pub principal_id: String,
    pub media_title: String,
    pub media_key: String,
    pub file_size: Option<i64>,
    pub downloaded_at: i64,
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

impl From<AdminRow> for AdminPrincipal {
    fn from(row: AdminRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            last_login: row.last_login.map(timestamp),
        }
    }
}

impl From<PlexUserRow> for DelegatedPrincipal {
    fn from(row: PlexUserRow) -> Self {
        Self {
            id: row.id,
            plex_account_id: row.plex_account_id,
            username: row.username,
            email: row.email,
            upstream_token: row.upstream_token,
            home_server_url: row.home_server_url,
            last_login: row.last_login.map(timestamp),
        }
    }
}

impl From<&SessionRow> for Session {
    fn from(row: &SessionRow) -> Self {
        Self {
            id: row.id.clone(),
            principal_id: row.principal_id.clone(),
            created_at: timestamp(row.created_at),
            expires_at: timestamp(row.expires_at),
        }
    }
}

impl From<DownloadLogRow> for DownloadLogEntry {
    fn from(row: DownloadLogRow) -> Self {
        Self {
            id: row.id,
            principal_id: row.principal_id,
            media_title: row.media_title,
            media_key: row.media_key,
            file_size: row.file_size.and_then(|s| u64::try_from(s).ok()),
            downloaded_at: timestamp(row.downloaded_at),
        }
    }
}
