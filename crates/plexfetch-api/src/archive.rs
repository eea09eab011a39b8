//! Streaming zip of several upstream files.
//!
//! A writer task fills a bounded in-memory pipe while the response body
//! drains it, so memory use is independent of archive size. Entries are
//! stored uncompressed and fetched strictly one after another.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures_util::io::AsyncWriteExt;
use futures_util::stream::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::StreamError;
use crate::fetch::Fetcher;
use crate::state::AppStateInner;
use crate::stream::{DownloadRecord, content_disposition, record_download};

/// Size of the pipe between the zip writer and the response body.
const PIPE_CAPACITY: usize = 64 * 1024;

pub const ESTIMATED_LENGTH_HEADER: &str = "x-estimated-content-length";

/// Added to the archive when any entry is missing or truncated.
pub const INCOMPLETE_MANIFEST: &str = "INCOMPLETE.txt";

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub url: Url,
    pub filename: String,
    pub size: Option<u64>,
}

/// Aggregate progress across all entries of one archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveProgress {
    pub processed: u64,
    pub total: Option<u64>,
}

impl ArchiveProgress {
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some((self.processed as f64 / total as f64 * 100.0).min(100.0)),
        }
    }
}

/// A single entry that could not be archived. The archive carries on.
#[derive(Debug, Error)]
pub enum ArchiveEntryError {
    #[error("fetch failed: {0}")]
    Fetch(StreamError),

    #[error("upstream read failed after {written} bytes: {source}")]
    Read { written: u64, source: io::Error },
}

#[derive(Debug, Default)]
pub struct ArchiveSummary {
    /// Names as they appear inside the archive.
    pub written: Vec<String>,
    pub skipped: Vec<(String, ArchiveEntryError)>,
    pub bytes: u64,
}

/// `sum(size) * 1.01`, rounded up. Only known when every entry has a size.
pub fn estimated_size(entries: &[ArchiveEntry]) -> Option<u64> {
    let sum = total_size(entries)?;
    Some(sum.saturating_add(sum.div_ceil(100)))
}

fn total_size(entries: &[ArchiveEntry]) -> Option<u64> {
    entries.iter().map(|e| e.size).sum()
}

/// `name`, or `name (n).ext` if that was already taken in this archive.
fn unique_name(seen: &mut HashSet<String>, name: &str) -> String {
    if seen.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Plain-text list of entries that are missing or cut short.
fn incomplete_manifest(skipped: &[(String, ArchiveEntryError)]) -> String {
    let mut text = String::from("These files are missing or incomplete in this archive:\n\n");
    for (name, error) in skipped {
        let line = match error {
            ArchiveEntryError::Fetch(_) => format!("{}: missing, the media server could not provide it\n", name),
            ArchiveEntryError::Read { written, .. } => {
                format!("{}: incomplete, stopped after {} bytes\n", name, written)
            }
        };
        text.push_str(&line);
    }
    text
}

fn disconnected(e: impl std::fmt::Display) -> StreamError {
    debug!("Archive writer failed: {}", e);
    StreamError::ClientDisconnected
}

/// Write every entry into a zip on `writer`.
///
/// Fetch or read failures of a single entry are logged and skipped, and
/// listed in an `INCOMPLETE.txt` entry at the end. A failure of `writer`
/// itself means nobody is reading any more and aborts the archive with
/// `ClientDisconnected`, dropping the in-flight upstream.
pub async fn write_archive<W>(
    fetcher: &dyn Fetcher,
    entries: &[ArchiveEntry],
    writer: W,
) -> Result<ArchiveSummary, StreamError>
where
    W: AsyncWrite + Unpin,
{
    let mut zip = ZipFileWriter::with_tokio(writer);
    let mut summary = ArchiveSummary::default();
    let mut seen = HashSet::new();
    let mut progress = ArchiveProgress {
        processed: 0,
        total: total_size(entries),
    };

    for (index, entry) in entries.iter().enumerate() {
        let mut upstream = match fetcher.fetch(&entry.url).await {
            Ok(file) => file,
            Err(e) => {
                warn!(entry = index + 1, of = entries.len(), "Skipping {}: {}", entry.filename, e);
                summary
                    .skipped
                    .push((entry.filename.clone(), ArchiveEntryError::Fetch(e)));
                continue;
            }
        };

        let name = unique_name(&mut seen, &entry.filename);
        let builder = ZipEntryBuilder::new(name.clone().into(), Compression::Stored);
        let mut entry_writer = zip.write_entry_stream(builder).await.map_err(disconnected)?;

        let mut written = 0u64;
        let mut read_error = None;
        while let Some(chunk) = upstream.body.next().await {
            match chunk {
                Ok(bytes) => {
                    entry_writer.write_all(&bytes).await.map_err(disconnected)?;
                    written += bytes.len() as u64;
                }
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
        }
        // Close even a truncated entry so the archive stays readable.
        entry_writer.close().await.map_err(disconnected)?;

        progress.processed += written;
        summary.bytes += written;
        match read_error {
            Some(source) => {
                warn!(entry = index + 1, written, "Entry {} truncated: {}", name, source);
                summary
                    .skipped
                    .push((name, ArchiveEntryError::Read { written, source }));
            }
            None => {
                info!(
                    entry = index + 1,
                    of = entries.len(),
                    processed = progress.processed,
                    total = progress.total,
                    percent = progress.percent(),
                    "Archived {}",
                    name
                );
                summary.written.push(name);
            }
        }
    }

    if !summary.skipped.is_empty() {
        let name = unique_name(&mut seen, INCOMPLETE_MANIFEST);
        let manifest = incomplete_manifest(&summary.skipped);
        let builder = ZipEntryBuilder::new(name.into(), Compression::Stored);
        zip.write_entry_whole(builder, manifest.as_bytes())
            .await
            .map_err(disconnected)?;
    }

    let mut inner = zip.close().await.map_err(disconnected)?.into_inner();
    tokio::io::AsyncWriteExt::shutdown(&mut inner).await.map_err(disconnected)?;
    Ok(summary)
}

/// Respond with a zip of `entries`, written on a separate task.
///
/// Headers go out before the first entry is fetched. Content-Length is
/// left off because the final size is only known once the archive is
/// finalized; the estimate goes in its own header instead.
pub fn stream_zip(
    state: &AppStateInner,
    record: DownloadRecord,
    entries: Vec<ArchiveEntry>,
    zip_name: &str,
) -> Response {
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let fetcher: Arc<dyn Fetcher> = state.fetcher.clone();
    let db = state.db.clone();
    let estimate = estimated_size(&entries);
    let label = zip_name.to_string();

    info!(entries = entries.len(), estimated_size = estimate, "Starting archive {}", label);

    tokio::spawn(async move {
        match write_archive(fetcher.as_ref(), &entries, writer).await {
            Ok(summary) => {
                info!(
                    written = summary.written.len(),
                    skipped = summary.skipped.len(),
                    bytes = summary.bytes,
                    "Archive {} finalized",
                    label
                );
                if !summary.written.is_empty() {
                    let record = DownloadRecord {
                        file_size: Some(summary.bytes),
                        ..record
                    };
                    record_download(db, record).await;
                }
            }
            Err(e) => warn!("Archive {} aborted: {}", label, e),
        }
    });

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(zip_name));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Some(size) = estimate {
        headers.insert(ESTIMATED_LENGTH_HEADER, HeaderValue::from(size));
    }

    let body = Body::from_stream(ReaderStream::new(reader));
    (StatusCode::OK, headers, body).into_response()
}
