//! Source item repository.

use crate::error::MetadataResult;
use crate::models::SourceRow;
use async_trait::async_trait;

/// Repository for resolved source items.
#[async_trait]
pub trait SourceRepo: Send + Sync {
    /// Insert or replace the source keyed by `item_id`.
    async fn upsert_source(&self, source: &SourceRow) -> MetadataResult<()>;

    /// Get a source by item id.
    async fn get_source(&self, item_id: &str) -> MetadataResult<Option<SourceRow>>;
}
