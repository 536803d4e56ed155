//! Resolved source items.

use serde::{Deserialize, Serialize};

/// Number of upload requests fanned out per resolved item.
pub const DEFAULT_CLONE_COUNT: u32 = 3;

/// Vertical resolution for a quality tag, if known.
pub fn tag_resolution(tag: u32) -> Option<u32> {
    match tag {
        18 => Some(360),
        59 => Some(480),
        22 => Some(720),
        37 => Some(1080),
        _ => None,
    }
}

/// Container extension for a quality tag, if known.
pub fn tag_extension(tag: u32) -> Option<&'static str> {
    match tag {
        5 | 6 | 34 | 35 => Some("flv"),
        13 | 17 | 36 => Some("3gp"),
        18 | 22 | 37 | 38 | 59 => Some("mp4"),
        43..=46 => Some("webm"),
        _ => None,
    }
}

/// A playable URL at a given quality.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLink {
    pub quality_tag: u32,
    pub url: String,
    pub resolution: Option<u32>,
    pub extension: Option<String>,
}

impl CandidateLink {
    pub fn new(quality_tag: u32, url: impl Into<String>) -> Self {
        Self {
            quality_tag,
            url: url.into(),
            resolution: tag_resolution(quality_tag),
            extension: tag_extension(quality_tag).map(str::to_string),
        }
    }
}

/// Result of resolving a single remote item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub item_id: String,
    pub owner_id: i64,
    pub title: String,
    /// Duration in seconds.
    pub duration: i64,
    /// Per-session token returned alongside the links.
    pub credential_value: String,
    /// Unix seconds after which the candidate links stop working.
    pub expiry: Option<i64>,
    /// Ordered as returned by the remote API.
    pub candidate_links: Vec<CandidateLink>,
    pub clone_count: u32,
}
