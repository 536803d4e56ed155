//! Upload ledger repository.

use crate::error::MetadataResult;
use crate::models::UploadLogRow;
use async_trait::async_trait;
use ferry_core::UploadStatus;

/// Repository for the upload ledger.
#[async_trait]
pub trait UploadLedgerRepo: Send + Sync {
    /// Record an upload. Returns `false` if the message id was already recorded.
    async fn record_upload(&self, entry: &UploadLogRow) -> MetadataResult<bool>;

    /// Get a ledger row by message id.
    async fn get_upload(&self, message_id: &str) -> MetadataResult<Option<UploadLogRow>>;

    /// List rows for an owner group in the given status, oldest first.
    async fn list_uploads(
        &self,
        owner_group: &str,
        status: UploadStatus,
    ) -> MetadataResult<Vec<UploadLogRow>>;

    /// Set the status of a single row. Fails with `NotFound` if absent.
    async fn set_upload_status(&self, message_id: &str, status: UploadStatus)
    -> MetadataResult<()>;

    /// Set the status of many rows in one transaction. Returns rows changed.
    async fn mark_uploads(
        &self,
        message_ids: &[String],
        status: UploadStatus,
    ) -> MetadataResult<u64>;
}
