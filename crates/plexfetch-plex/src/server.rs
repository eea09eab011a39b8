use plexfetch_types::models::ServerCredentials;
use reqwest::{Client, Url};
use tracing::debug;

use crate::error::PlexError;
use crate::models::{Directory, Envelope, MediaContainer, Metadata};

/// Query client for one media server, built per request from resolved
/// credentials. Holds no state beyond the connection parameters.
pub struct PlexServer {
    http: Client,
    base: Url,
    token: String,
}

impl PlexServer {
    pub fn new(http: Client, creds: &ServerCredentials) -> Result<Self, PlexError> {
        let base = Url::parse(creds.server_url.trim_end_matches('/'))?;
        Ok(Self {
            http,
            base,
            token: creds.token.clone(),
        })
    }

    /// `{server}{path}` without adding any query parameters.
    fn endpoint(&self, path: &str) -> Result<Url, PlexError> {
        let base = self.base.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}{}", base, path))?)
    }

    async fn container(&self, path: &str, query: &[(&str, &str)]) -> Result<MediaContainer, PlexError> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .header("X-Plex-Token", &self.token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PlexError::Status(status.as_u16()));
        }

        let envelope: Envelope = resp.json().await?;
        Ok(envelope.container)
    }

    /// Server identity; carries `machineIdentifier`.
    pub async fn identity(&self) -> Result<MediaContainer, PlexError> {
        self.container("/identity", &[]).await
    }

    pub async fn libraries(&self) -> Result<Vec<Directory>, PlexError> {
        Ok(self.container("/library/sections", &[]).await?.directories)
    }

    pub async fn library_items(&self, section_key: &str) -> Result<Vec<Metadata>, PlexError> {
        let key = validate_key(section_key)?;
        let path = format!("/library/sections/{}/all", key);
        Ok(self.container(&path, &[]).await?.metadata)
    }

    /// Full container, since `allowSync` lives on the container, not the item.
    pub async fn metadata(&self, rating_key: &str) -> Result<MediaContainer, PlexError> {
        let key = validate_key(rating_key)?;
        self.container(&format!("/library/metadata/{}", key), &[]).await
    }

    pub async fn children(&self, rating_key: &str) -> Result<Vec<Metadata>, PlexError> {
        let key = validate_key(rating_key)?;
        let path = format!("/library/metadata/{}/children", key);
        Ok(self.container(&path, &[]).await?.metadata)
    }

    /// Every playable descendant (episodes of a show or season, tracks of an album).
    pub async fn all_leaves(&self, rating_key: &str) -> Result<MediaContainer, PlexError> {
        let key = validate_key(rating_key)?;
        self.container(&format!("/library/metadata/{}/allLeaves", key), &[]).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Metadata>, PlexError> {
        Ok(self.container("/search", &[("query", query)]).await?.metadata)
    }

    pub async fn recently_added(&self, limit: u32) -> Result<Vec<Metadata>, PlexError> {
        let size = limit.to_string();
        let query = [
            ("X-Plex-Container-Start", "0"),
            ("X-Plex-Container-Size", size.as_str()),
        ];
        Ok(self.container("/library/recentlyAdded", &query).await?.metadata)
    }

    /// `{server}{part}?download=1&X-Plex-Token={token}`
    pub fn download_url(&self, part_key: &str) -> Result<Url, PlexError> {
        let mut url = self.endpoint(&validate_path(part_key)?)?;
        url.query_pairs_mut()
            .append_pair("download", "1")
            .append_pair("X-Plex-Token", &self.token);
        Ok(url)
    }

    /// URL for an artwork asset such as a thumbnail.
    pub fn asset_url(&self, path: &str) -> Result<Url, PlexError> {
        let mut url = self.endpoint(&validate_asset_path(path)?)?;
        url.query_pairs_mut().append_pair("X-Plex-Token", &self.token);
        Ok(url)
    }
}

/// Keys are interpolated into paths, so only plain identifiers pass.
pub fn validate_key(key: &str) -> Result<&str, PlexError> {
    let ok = !key.is_empty()
        && key.len() <= 64
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok { Ok(key) } else { Err(PlexError::InvalidKey(key.to_string())) }
}

/// Server-relative paths only: no scheme, no authority, no parent segments.
pub fn validate_path(path: &str) -> Result<String, PlexError> {
    let invalid = || PlexError::InvalidPath(path.to_string());
    if !path.starts_with('/') || path.starts_with("//") || path.contains('\\') {
        return Err(invalid());
    }
    let (route, _) = path.split_once('?').unwrap_or((path, ""));
    if route.split('/').any(|seg| seg == ".." || seg == ".") {
        return Err(invalid());
    }
    Ok(path.to_string())
}

const ARTWORK_KINDS: &[&str] = &["thumb", "art", "banner", "theme", "clearLogo"];

/// Artwork only: `/library/metadata/{key}/{kind}[/{stamp}]` or the photo
/// transcoder. Media parts must go through `download_url`, whose caller
/// checks the download permission first.
pub fn validate_asset_path(path: &str) -> Result<String, PlexError> {
    let path = validate_path(path)?;
    let invalid = || PlexError::InvalidPath(path.clone());

    if let Some(rest) = path.strip_prefix("/photo/:/transcode") {
        return if rest.is_empty() || rest.starts_with('?') { Ok(path) } else { Err(invalid()) };
    }

    let Some(rest) = path.strip_prefix("/library/metadata/") else {
        return Err(invalid());
    };
    let mut segments = rest.split('/');
    let ok = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(key), Some(kind), stamp, None) => {
            validate_key(key).is_ok()
                && ARTWORK_KINDS.contains(&kind)
                && stamp.is_none_or(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        }
        _ => false,
    };
    if ok { Ok(path) } else { Err(invalid()) }
}
