//! Typed queue messages.
//!
//! Each routing key carries exactly one message type. Field names follow the
//! wire format the producers already emit; the domain names are accepted as
//! aliases on input.

use crate::error::{Error, Result};
use crate::topology::Route;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A message that travels on a fixed route.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const ROUTE: Route;

    /// Boundary validation. Messages that fail are dropped, never retried.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Decode and validate a raw payload.
    fn decode(payload: &[u8]) -> Result<Self> {
        let message: Self = serde_json::from_slice(payload)
            .map_err(|e| Error::InvalidMessage(format!("{}: {e}", Self::ROUTE)))?;
        message.validate()?;
        Ok(message)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidMessage(format!("{field} is required")));
    }
    Ok(())
}

/// Resolve one remote item and fan out uploads for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    #[serde(alias = "item_id")]
    pub drive_id: String,
    #[serde(alias = "owner_id")]
    pub user_id: i64,
}

impl Message for ResolveRequest {
    const ROUTE: Route = Route::Source;

    fn validate(&self) -> Result<()> {
        require("drive_id", &self.drive_id)
    }
}

/// Upload one item using a leased credential pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub cookie: String,
    /// Owner group of the leased cookie.
    #[serde(alias = "owner_group")]
    pub email: String,
    #[serde(alias = "item_id")]
    pub driveid: String,
    pub apikey: String,
}

impl Message for UploadRequest {
    const ROUTE: Route = Route::Upload;

    fn validate(&self) -> Result<()> {
        require("email", &self.email)?;
        require("driveid", &self.driveid)
    }
}

/// The session cookie of an owner group stopped working.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRevoked {
    #[serde(alias = "owner_group")]
    pub email: String,
}

impl Message for CookieRevoked {
    const ROUTE: Route = Route::Cookie;

    fn validate(&self) -> Result<()> {
        require("email", &self.email)
    }
}

/// Resubmit an item once a fresh credential is available.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecheckRequest {
    #[serde(alias = "owner_group")]
    pub email: String,
    #[serde(alias = "item_id")]
    pub driveid: String,
}

impl Message for RecheckRequest {
    const ROUTE: Route = Route::Recheck;

    fn validate(&self) -> Result<()> {
        require("email", &self.email)?;
        require("driveid", &self.driveid)
    }
}

/// Walk a remote folder tree for an extraction job.
///
/// Only the job id is checked at the boundary: a missing root id is reported
/// against the job record instead of being dropped silently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    #[serde(default, alias = "root_id")]
    pub drive_id: Option<String>,
    #[serde(default, alias = "job_id")]
    pub id: Option<i64>,
    /// Caller-supplied listing key. Unused when the pool has one.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Message for ExportRequest {
    const ROUTE: Route = Route::ExportDrive;

    fn validate(&self) -> Result<()> {
        if self.id.is_none() {
            return Err(Error::InvalidMessage("id is required".to_string()));
        }
        Ok(())
    }
}
