use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use tracing::debug;
use url::Url;

use crate::error::StreamError;

/// An open upstream response whose body has not been read yet.
pub struct UpstreamFile {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

/// Source of upstream byte streams. Handlers only see this trait, so tests
/// can serve canned bodies or inject failures.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<UpstreamFile, StreamError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<UpstreamFile, StreamError> {
        // Download URLs carry the upstream token; never let it reach a log line.
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| StreamError::UpstreamUnreachable(e.without_url().to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StreamError::UpstreamUnreachable(format!("upstream returned {}", status)));
        }

        let headers = resp.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let content_length = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        debug!(content_length, "Upstream stream opened on {}", url.path());

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| io::Error::other(e.without_url())))
            .boxed();

        Ok(UpstreamFile {
            content_type,
            content_length,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn mirrors_headers_and_streams_body() {
        let mut upstream = Server::new_async().await;
        upstream
            .mock("GET", "/library/parts/1/file.mkv")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "video/x-matroska")
            .with_body("0123456789")
            .create_async()
            .await;

        let fetcher = HttpFetcher::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/library/parts/1/file.mkv?download=1", upstream.url())).unwrap();
        let file = fetcher.fetch(&url).await.unwrap();

        assert_eq!(file.content_type.as_deref(), Some("video/x-matroska"));
        assert_eq!(file.content_length, Some(10));
        let chunks: Vec<Bytes> = file.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"0123456789");
    }

    #[tokio::test]
    async fn error_status_is_unreachable_without_token() {
        let mut upstream = Server::new_async().await;
        upstream
            .mock("GET", "/library/parts/2/file.mkv")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/library/parts/2/file.mkv?X-Plex-Token=SECRET", upstream.url())).unwrap();
        let err = fetcher.fetch(&url).await.err().unwrap();

        assert!(matches!(err, StreamError::UpstreamUnreachable(_)));
        assert!(!err.to_string().contains("SECRET"));
    }
}
