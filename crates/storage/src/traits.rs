//! Object store trait.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Blob store for completed job logs.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Read an entire object.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Write an object, replacing any previous content.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object. Fails with `NotFound` if absent.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and writable.
    async fn health_check(&self) -> StorageResult<()>;
}
