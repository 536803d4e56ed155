//! Drive API response types and the results handed to workers.

use ferry_core::{CandidateLink, SourceItem};
use serde::Deserialize;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Video MIME types the listing keeps. Everything else except folders is
/// filtered out server side.
pub const SUPPORTED_VIDEO_MIME_TYPES: &[&str] = &[
    "video/webm",
    "video/mp4",
    "video/3gpp",
    "video/quicktime",
    "application/x-mpegURL",
    "video/x-msvideo",
    "video/x-ms-wmv",
    "video/x-flv",
    "application/metastream",
    "video/avchd-stream",
    "video/mts",
    "video/vnd.dlna.mpeg-tts",
    "video/ogg",
    "application/ogg",
];

/// files.list entry. Only the fields the listing asks for.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub mime_type: String,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// files.list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesListResponse {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

/// One page of a folder listing, split into leaves and child folders.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FolderPage {
    pub leaves: Vec<String>,
    pub folders: Vec<String>,
    pub next_page_token: Option<String>,
}

impl From<FilesListResponse> for FolderPage {
    fn from(response: FilesListResponse) -> Self {
        let (folders, leaves): (Vec<_>, Vec<_>) =
            response.files.into_iter().partition(DriveFile::is_folder);
        Self {
            leaves: leaves.into_iter().map(|f| f.id).collect(),
            folders: folders.into_iter().map(|f| f.id).collect(),
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

/// Resolved playback information for one item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoInfo {
    pub item_id: String,
    pub title: String,
    pub duration: i64,
    /// Value of the session cookie issued with the links.
    pub session_token: String,
    pub links: Vec<CandidateLink>,
    /// `expire` query parameter of the first link, unix seconds.
    pub expiry: Option<i64>,
}

impl VideoInfo {
    pub fn into_source_item(self, owner_id: i64, clone_count: u32) -> SourceItem {
        SourceItem {
            item_id: self.item_id,
            owner_id,
            title: self.title,
            duration: self.duration,
            credential_value: self.session_token,
            expiry: self.expiry,
            candidate_links: self.links,
            clone_count,
        }
    }
}
