//! Single-file download proxy.
//!
//! Bytes are piped from the media server to the client as they arrive;
//! nothing is buffered beyond the chunk in flight.

use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::{BoxStream, StreamExt};
use plexfetch_db::Database;
use plexfetch_plex::PlexServer;
use plexfetch_plex::models::MediaContainer;
use tracing::{error, info, warn};

use crate::error::{ApiError, PermissionError, StreamError};
use crate::state::AppStateInner;

/// The owner's `allowSync` flag gates every download of original files.
pub fn ensure_download_allowed(container: &MediaContainer) -> Result<(), PermissionError> {
    if container.allow_sync {
        Ok(())
    } else {
        Err(PermissionError::DownloadNotAllowed)
    }
}

/// What gets written to the download log once a body finished streaming.
#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub principal_id: String,
    pub media_title: String,
    pub media_key: String,
    pub file_size: Option<u64>,
}

pub async fn record_download(db: Arc<Database>, record: DownloadRecord) {
    let title = record.media_title.clone();
    let result = tokio::task::spawn_blocking(move || {
        db.insert_download_log(
            &record.principal_id,
            &record.media_title,
            &record.media_key,
            record.file_size,
            Utc::now().timestamp(),
        )
    })
    .await;

    match result {
        Ok(Ok(id)) => info!(log_id = id, "Download completed: {}", title),
        Ok(Err(e)) => error!("Failed to record download of {}: {}", title, e),
        Err(e) => error!("spawn_blocking join error: {}", e),
    }
}

/// Logs a client disconnect when a body is dropped before it finished.
struct DisconnectGuard {
    label: String,
    sent: u64,
    finished: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(bytes_sent = self.sent, "{}: {}", StreamError::ClientDisconnected, self.label);
        }
    }
}

/// Pipe an upstream body to the client, optionally logging the download
/// once the last byte went out.
fn relay_body(
    mut upstream: BoxStream<'static, io::Result<Bytes>>,
    label: String,
    on_complete: Option<(Arc<Database>, DownloadRecord)>,
) -> Body {
    let stream = async_stream::stream! {
        let mut guard = DisconnectGuard { label, sent: 0, finished: false };

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    guard.sent += bytes.len() as u64;
                    yield Ok(bytes);
                }
                Err(e) => {
                    // Headers are already out; all that is left is to abort the body.
                    error!(bytes_sent = guard.sent, "Upstream failed mid-stream for {}: {}", guard.label, e);
                    guard.finished = true;
                    yield Err(e);
                    return;
                }
            }
        }
        guard.finished = true;

        if let Some((db, mut record)) = on_complete {
            record.file_size = record.file_size.or(Some(guard.sent));
            record_download(db, record).await;
        }
    };

    Body::from_stream(stream)
}

/// `Content-Disposition: attachment` with an ASCII fallback and an RFC 5987
/// `filename*` for everything else.
pub fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        encode_rfc5987(filename)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn encode_rfc5987(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => out.push(byte as char),
            b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn header_or(value: Option<&str>, fallback: &'static str) -> HeaderValue {
    value
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static(fallback))
}

/// Stream the original file behind `rating_key` to the client.
///
/// Everything that can fail before the first byte (permission, lookup,
/// upstream connect) is returned as an `ApiError`. After that, failures only
/// abort the body.
pub async fn stream_media(
    state: &AppStateInner,
    server: &PlexServer,
    principal_id: &str,
    rating_key: &str,
) -> Result<Response, ApiError> {
    let container = server.metadata(rating_key).await?;
    ensure_download_allowed(&container)?;

    let item = container.metadata.first().ok_or(ApiError::NotFound)?;
    let part = item.first_part().ok_or(ApiError::NotFound)?;
    let filename = part.file_name();
    let url = server.download_url(&part.key)?;

    let upstream = state.fetcher.fetch(&url).await?;
    info!(
        rating_key,
        content_length = upstream.content_length,
        "Streaming {} to {}",
        filename,
        principal_id
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header_or(upstream.content_type.as_deref(), "application/octet-stream"),
    );
    if let Some(len) = upstream.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&filename));

    let record = DownloadRecord {
        principal_id: principal_id.to_string(),
        media_title: item.display_title(),
        media_key: rating_key.to_string(),
        file_size: upstream.content_length,
    };
    let body = relay_body(upstream.body, filename, Some((state.db.clone(), record)));

    Ok((StatusCode::OK, headers, body).into_response())
}

/// Same piping for server-relative assets such as thumbnails. No
/// permission gate and nothing is logged.
pub async fn stream_asset(state: &AppStateInner, server: &PlexServer, path: &str) -> Result<Response, ApiError> {
    let url = server.asset_url(path)?;
    let upstream = state.fetcher.fetch(&url).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header_or(upstream.content_type.as_deref(), "application/octet-stream"),
    );
    if let Some(len) = upstream.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, max-age=3600"));

    let body = relay_body(upstream.body, path.to_string(), None);
    Ok((StatusCode::OK, headers, body).into_response())
}
