//! Typed media server payloads (JSON, `Accept: application/json`).

use serde::{Deserialize, Serialize};

use crate::wire::deserialize_flag;

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(rename = "MediaContainer")]
    pub container: MediaContainer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaContainer {
    #[serde(default)]
    pub size: Option<u64>,
    /// Whether the owner permits downloading originals. Absent means no.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub allow_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title2: Option<String>,
    #[serde(rename = "Directory", default, skip_serializing_if = "Vec::is_empty")]
    pub directories: Vec<Directory>,
    #[serde(rename = "Metadata", default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<Metadata>,
}

/// A library section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub thumb: Option<String>,
    #[serde(default)]
    pub art: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub rating_key: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub parent_rating_key: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub parent_index: Option<u32>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub thumb: Option<String>,
    #[serde(default)]
    pub art: Option<String>,
    #[serde(default)]
    pub parent_title: Option<String>,
    #[serde(default)]
    pub grandparent_title: Option<String>,
    #[serde(default)]
    pub added_at: Option<i64>,
    #[serde(default)]
    pub leaf_count: Option<u32>,
    #[serde(default)]
    pub child_count: Option<u32>,
    #[serde(rename = "Media", default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
}

impl Metadata {
    /// The first downloadable file of the first media version.
    pub fn first_part(&self) -> Option<&Part> {
        self.media.iter().flat_map(|m| m.parts.iter()).find(|p| !p.key.is_empty())
    }

    /// Title as shown in the download log, e.g. `Show - Episode`.
    pub fn display_title(&self) -> String {
        match self.grandparent_title.as_deref().or(self.parent_title.as_deref()) {
            Some(parent) if !parent.is_empty() && self.kind != "season" => {
                format!("{} - {}", parent, self.title)
            }
            _ => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub video_resolution: Option<String>,
    #[serde(rename = "Part", default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub id: Option<i64>,
    /// Server-relative path, e.g. `/library/parts/12/1700000000/file.mkv`.
    #[serde(default)]
    pub key: String,
    /// Path of the file on the server's disk.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub container: Option<String>,
}

impl Part {
    /// Basename of the remote file, falling back to the last key segment.
    pub fn file_name(&self) -> String {
        let source = self.file.as_deref().filter(|f| !f.is_empty()).unwrap_or(&self.key);
        basename(source).to_string()
    }
}

/// Last path segment, accepting both `/` and `\` separators.
pub fn basename(path: &str) -> &str {
    let trimmed = path.split(['?', '#']).next().unwrap_or(path);
    trimmed
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or("download")
}
