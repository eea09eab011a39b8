use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::Response,
};
use serde::Deserialize;
use tracing::info;

use plexfetch_types::api::DownloadHistoryResponse;
use plexfetch_types::models::Principal;

use crate::archive::{ArchiveEntry, stream_zip};
use crate::credentials::server_for;
use crate::error::ApiError;
use crate::state::AppState;
use crate::stream::{DownloadRecord, ensure_download_allowed, stream_asset, stream_media};

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ThumbQuery {
    pub path: String,
}

/// Archive file name derived from an item title.
fn zip_file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "download.zip".to_string()
    } else {
        format!("{}.zip", cleaned)
    }
}

/// GET /api/download/{rating_key}
pub async fn download_item(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(rating_key): Path<String>,
) -> Result<Response, ApiError> {
    let server = server_for(&state, &principal).await?;
    stream_media(&state, &server, principal.id(), &rating_key).await
}

/// GET /api/download/{rating_key}/zip: every playable descendant of a show,
/// season or album in one archive.
pub async fn download_zip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(rating_key): Path<String>,
) -> Result<Response, ApiError> {
    let server = server_for(&state, &principal).await?;

    let parent = server.metadata(&rating_key).await?;
    let item = parent.metadata.first().ok_or(ApiError::NotFound)?;
    let title = item.display_title();

    let leaves = server.all_leaves(&rating_key).await?;
    ensure_download_allowed(&leaves)?;

    let mut entries = Vec::with_capacity(leaves.metadata.len());
    for leaf in &leaves.metadata {
        let Some(part) = leaf.first_part() else { continue };
        entries.push(ArchiveEntry {
            url: server.download_url(&part.key)?,
            filename: part.file_name(),
            size: part.size,
        });
    }
    if entries.is_empty() {
        return Err(ApiError::NotFound);
    }

    info!(rating_key = %rating_key, entries = entries.len(), "Zip requested by {}", principal.username());
    let record = DownloadRecord {
        principal_id: principal.id().to_string(),
        media_title: title.clone(),
        media_key: rating_key.clone(),
        file_size: None,
    };
    Ok(stream_zip(&state, record, entries, &zip_file_name(&title)))
}

/// GET /api/downloads: own history, or everyone's for the administrator.
pub async fn history(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<DownloadHistoryResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    let filter = (!principal.is_admin()).then(|| principal.id().to_string());

    let rows = state
        .with_db(move |db| db.list_download_logs(filter.as_deref(), limit))
        .await?;
    Ok(Json(DownloadHistoryResponse {
        entries: rows.into_iter().map(Into::into).collect(),
    }))
}

/// GET /api/thumb?path=
pub async fn thumbnail(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ThumbQuery>,
) -> Result<Response, ApiError> {
    let server = server_for(&state, &principal).await?;
    stream_asset(&state, &server, &query.path).await
}
