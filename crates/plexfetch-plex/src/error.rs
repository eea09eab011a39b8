use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlexError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("malformed upstream XML: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("invalid upstream URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    #[error("invalid asset path: {0:?}")]
    InvalidPath(String),
}

impl PlexError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status(404))
    }
}
