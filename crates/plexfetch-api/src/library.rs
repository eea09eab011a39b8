//! Read-only browsing of the media server, on the caller's own credentials.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use plexfetch_plex::models::{Directory, MediaContainer, Metadata};
use plexfetch_types::models::Principal;

use crate::credentials::server_for;
use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_RECENT_LIMIT: u32 = 24;
const MAX_RECENT_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

/// GET /api/libraries
pub async fn libraries(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<Directory>>, ApiError> {
    let server = server_for(&state, &principal).await?;
    Ok(Json(server.libraries().await?))
}

/// GET /api/libraries/{key}/items
pub async fn library_items(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(key): Path<String>,
) -> Result<Json<Vec<Metadata>>, ApiError> {
    let server = server_for(&state, &principal).await?;
    Ok(Json(server.library_items(&key).await?))
}

/// GET /api/metadata/{rating_key}
///
/// The whole container is returned so clients can see `allowSync`.
pub async fn metadata(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(rating_key): Path<String>,
) -> Result<Json<MediaContainer>, ApiError> {
    let server = server_for(&state, &principal).await?;
    let container = server.metadata(&rating_key).await?;
    if container.metadata.is_empty() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(container))
}

/// GET /api/metadata/{rating_key}/children
pub async fn children(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(rating_key): Path<String>,
) -> Result<Json<Vec<Metadata>>, ApiError> {
    let server = server_for(&state, &principal).await?;
    Ok(Json(server.children(&rating_key).await?))
}

/// GET /api/search?q=
pub async fn search(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Metadata>>, ApiError> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(ApiError::BadRequest("search query is empty".into()));
    }
    let server = server_for(&state, &principal).await?;
    Ok(Json(server.search(q).await?))
}

/// GET /api/recently-added?limit=
pub async fn recently_added(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<Metadata>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(1, MAX_RECENT_LIMIT);
    let server = server_for(&state, &principal).await?;
    Ok(Json(server.recently_added(limit).await?))
}
