//! Leasable credentials.
//!
//! A credential is a secret scoped to an owner group (usually an account
//! e-mail). Workers never hold a credential exclusively: a lease returns a
//! snapshot and stamps the row so the next lease for the same key prefers a
//! longer-idle credential.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::{Duration, OffsetDateTime};

/// How long a rate-limited credential stays out of rotation.
pub const RATE_LIMIT_WINDOW: Duration = Duration::days(1);

/// Well-known credential keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialKey {
    /// Shared key for the folder listing API.
    #[serde(rename = "GDRIVE_API_KEY")]
    ApiKey,
    /// Per-account session cookie used by the uploader.
    #[serde(rename = "GMAIL_COOKIE")]
    SessionCookie,
}

impl CredentialKey {
    /// Key as stored in the `configs` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "GDRIVE_API_KEY",
            Self::SessionCookie => "GMAIL_COOKIE",
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "GDRIVE_API_KEY" => Ok(Self::ApiKey),
            "GMAIL_COOKIE" => Ok(Self::SessionCookie),
            other => Err(crate::Error::UnknownValue {
                kind: "credential key",
                value: other.to_string(),
            }),
        }
    }
}

/// Credential status flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Active,
    Inactive,
}

impl CredentialStatus {
    /// Integer flag as stored in the `configs.status` column.
    pub fn as_flag(&self) -> i64 {
        match self {
            Self::Active => 1,
            Self::Inactive => 0,
        }
    }

    /// Decode a stored flag. Any non-zero value counts as active.
    pub fn from_flag(flag: i64) -> Self {
        if flag == 0 {
            Self::Inactive
        } else {
            Self::Active
        }
    }
}

/// Immutable snapshot of a credential row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub key: String,
    pub group: String,
    pub value: String,
    /// While set and in the future, the credential is out of rotation.
    pub expired_to: Option<OffsetDateTime>,
    pub status: CredentialStatus,
    pub last_leased_at: Option<OffsetDateTime>,
}

impl Credential {
    /// Whether this credential may be handed out at `now`.
    pub fn is_leasable(&self, now: OffsetDateTime) -> bool {
        self.status == CredentialStatus::Active && self.expired_to.is_none_or(|until| until < now)
    }
}
