//! Extraction job repository.

use crate::error::MetadataResult;
use crate::models::ExtractionJobRow;
use async_trait::async_trait;
use ferry_core::ExtractionStatus;

/// Repository for extraction jobs.
#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Create a pending job and return its id.
    async fn create_extraction_job(&self, root_id: &str, owner_id: i64) -> MetadataResult<i64>;

    /// Get a job by id.
    async fn get_extraction_job(&self, job_id: i64) -> MetadataResult<Option<ExtractionJobRow>>;

    /// Set job status. Fails with `NotFound` if the job does not exist.
    async fn update_job_status(
        &self,
        job_id: i64,
        status: ExtractionStatus,
    ) -> MetadataResult<()>;

    /// Mark a job finished with its discovered item count.
    async fn finish_extraction_job(&self, job_id: i64, total_items: i64) -> MetadataResult<()>;
}
