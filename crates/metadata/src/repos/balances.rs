//! Balance ledger repository.

use crate::error::MetadataResult;
use crate::models::BalanceRow;
use async_trait::async_trait;

/// Repository for the append-only balance ledger.
#[async_trait]
pub trait BalanceRepo: Send + Sync {
    /// Append an entry and return its id.
    async fn insert_balance_entry(&self, entry: &BalanceRow) -> MetadataResult<i64>;

    /// List entries for an owner, oldest first.
    async fn list_balance_entries(&self, owner_id: i64) -> MetadataResult<Vec<BalanceRow>>;
}
