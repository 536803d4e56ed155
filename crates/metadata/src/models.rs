//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use ferry_core::{
    BalanceEntry, CandidateLink, Credential, CredentialStatus, ExtractionJob, SourceItem,
    UploadLedgerEntry,
};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Unix seconds to an instant. Out-of-range values are treated as unset.
pub(crate) fn from_unix_secs(secs: Option<i64>) -> Option<OffsetDateTime> {
    secs.and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
}

/// Unix microseconds to an instant. Out-of-range values are treated as unset.
pub(crate) fn from_unix_micros(micros: Option<i64>) -> Option<OffsetDateTime> {
    micros.and_then(|m| OffsetDateTime::from_unix_timestamp_nanos(i128::from(m) * 1_000).ok())
}

/// Instant to unix microseconds, the resolution of `configs.last_leased_at`.
pub fn unix_micros(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000) as i64
}

// =============================================================================
// Credentials (`configs`)
// =============================================================================

/// Credential record.
#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub id: i64,
    pub key: String,
    #[sqlx(rename = "group")]
    pub group: String,
    pub value: String,
    /// Unix seconds.
    pub expired_to: Option<i64>,
    /// 1 = active, 0 = inactive.
    pub status: i64,
    /// Unix microseconds.
    pub last_leased_at: Option<i64>,
}

impl From<CredentialRow> for Credential {
    fn from(row: CredentialRow) -> Self {
        Credential {
            id: row.id,
            key: row.key,
            group: row.group,
            value: row.value,
            expired_to: from_unix_secs(row.expired_to),
            status: CredentialStatus::from_flag(row.status),
            last_leased_at: from_unix_micros(row.last_leased_at),
        }
    }
}

/// Credential to insert. Administration and fixtures only.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub key: String,
    pub group: String,
    pub value: String,
    pub expired_to: Option<i64>,
    pub status: CredentialStatus,
    pub last_leased_at: Option<i64>,
}

impl NewCredential {
    /// An active, never-leased credential.
    pub fn active(key: &str, group: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            group: group.to_string(),
            value: value.to_string(),
            expired_to: None,
            status: CredentialStatus::Active,
            last_leased_at: None,
        }
    }
}

// =============================================================================
// Extraction jobs (`user_drives`)
// =============================================================================

/// Extraction job record.
#[derive(Debug, Clone, FromRow)]
pub struct ExtractionJobRow {
    pub id: i64,
    pub root_id: String,
    pub owner_id: i64,
    pub total_items: i64,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ExtractionJobRow {
    pub fn into_job(self) -> MetadataResult<ExtractionJob> {
        Ok(ExtractionJob {
            id: self.id,
            root_id: self.root_id,
            owner_id: self.owner_id,
            total_items: self.total_items,
            status: self.status.parse()?,
        })
    }
}

// =============================================================================
// Source items (`sources`)
// =============================================================================

/// Source item record. Candidate links are stored as a JSON array.
#[derive(Debug, Clone, FromRow)]
pub struct SourceRow {
    pub item_id: String,
    pub owner_id: i64,
    pub title: String,
    pub duration: i64,
    pub credential_value: String,
    pub expiry: Option<i64>,
    pub candidate_links: String,
    pub clone_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl SourceRow {
    pub fn from_item(item: &SourceItem, now: OffsetDateTime) -> MetadataResult<Self> {
        Ok(Self {
            item_id: item.item_id.clone(),
            owner_id: item.owner_id,
            title: item.title.clone(),
            duration: item.duration,
            credential_value: item.credential_value.clone(),
            expiry: item.expiry,
            candidate_links: serde_json::to_string(&item.candidate_links)?,
            clone_count: i64::from(item.clone_count),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn into_item(self) -> MetadataResult<SourceItem> {
        let candidate_links: Vec<CandidateLink> = serde_json::from_str(&self.candidate_links)?;
        Ok(SourceItem {
            item_id: self.item_id,
            owner_id: self.owner_id,
            title: self.title,
            duration: self.duration,
            credential_value: self.credential_value,
            expiry: self.expiry,
            candidate_links,
            clone_count: u32::try_from(self.clone_count).unwrap_or(0),
        })
    }
}

// =============================================================================
// Upload ledger (`upload_queue_logs`)
// =============================================================================

/// Upload ledger record.
#[derive(Debug, Clone, FromRow)]
pub struct UploadLogRow {
    pub message_id: String,
    pub item_id: String,
    pub owner_group: String,
    pub status: String,
    pub created_at: OffsetDateTime,
}

impl UploadLogRow {
    pub fn into_entry(self) -> MetadataResult<UploadLedgerEntry> {
        Ok(UploadLedgerEntry {
            message_id: self.message_id,
            item_id: self.item_id,
            owner_group: self.owner_group,
            status: self.status.parse()?,
            created_at: self.created_at,
        })
    }
}

// =============================================================================
// Balance ledger (`balance_logs`)
// =============================================================================

/// Balance ledger record.
#[derive(Debug, Clone, FromRow)]
pub struct BalanceRow {
    pub id: i64,
    pub owner_id: i64,
    pub amount: i64,
    pub transaction_type: String,
    pub source_id: i64,
    pub transaction_at: OffsetDateTime,
}

impl BalanceRow {
    /// Row for a new entry. The id is assigned on insert.
    pub fn from_entry(entry: &BalanceEntry) -> Self {
        Self {
            id: 0,
            owner_id: entry.owner_id,
            amount: entry.amount,
            transaction_type: entry.transaction_type.as_str().to_string(),
            source_id: entry.source_id,
            transaction_at: entry.timestamp,
        }
    }
}
