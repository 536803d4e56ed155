//! Credential repository.

use crate::error::MetadataResult;
use crate::models::{CredentialRow, NewCredential};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for leasable credentials.
#[async_trait]
pub trait CredentialRepo: Send + Sync {
    /// Insert a credential and return its id.
    async fn insert_credential(&self, credential: &NewCredential) -> MetadataResult<i64>;

    /// Lease the longest-idle active credential for `key`.
    ///
    /// The pick and the `last_leased_at` stamp happen in one statement, so two
    /// concurrent leases never receive the same row while another candidate
    /// exists. Returns `None` when nothing is leasable at `now`.
    async fn lease_credential(
        &self,
        key: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<Option<CredentialRow>>;

    /// Mark every credential for (key, group) inactive. Returns rows changed.
    async fn disable_credentials(&self, key: &str, group: &str) -> MetadataResult<u64>;

    /// Take every credential for (key, group) out of rotation until `until`.
    async fn rate_limit_credentials(
        &self,
        key: &str,
        group: &str,
        until: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// List credentials for (key, group).
    async fn get_credentials(&self, key: &str, group: &str)
    -> MetadataResult<Vec<CredentialRow>>;
}
