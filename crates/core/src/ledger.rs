//! Upload and balance ledger records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Status of an upload ledger row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Observed on the upload queue, not yet confirmed.
    Ready,
    /// Uploader confirmed completion.
    Complete,
    /// Cancelled because the owner's session credential was revoked.
    Cancel,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "ready" => Ok(Self::Ready),
            "complete" => Ok(Self::Complete),
            "cancel" => Ok(Self::Cancel),
            other => Err(crate::Error::UnknownValue {
                kind: "upload status",
                value: other.to_string(),
            }),
        }
    }
}

/// One upload request as seen on the upload queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadLedgerEntry {
    pub message_id: String,
    pub item_id: String,
    pub owner_group: String,
    pub status: UploadStatus,
    pub created_at: OffsetDateTime,
}

/// Balance transaction kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "EXPORT_DRIVE")]
    ExportDrive,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExportDrive => "EXPORT_DRIVE",
        }
    }
}

/// Append-only debit written for a completed extraction that is not
/// forwarded for resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub owner_id: i64,
    /// Negated discovered item count.
    pub amount: i64,
    pub transaction_type: TransactionType,
    /// Extraction job id.
    pub source_id: i64,
    pub timestamp: OffsetDateTime,
}

impl BalanceEntry {
    /// Debit for an extraction job that discovered `total` items.
    pub fn export_debit(owner_id: i64, job_id: i64, total: i64, timestamp: OffsetDateTime) -> Self {
        Self {
            owner_id,
            amount: -total,
            transaction_type: TransactionType::ExportDrive,
            source_id: job_id,
            timestamp,
        }
    }
}
