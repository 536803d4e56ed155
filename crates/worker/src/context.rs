//! Dependencies shared by every worker in a process.

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use ferry_core::config::AppConfig;
use ferry_core::{Credential, CredentialKey};
use ferry_drive::{FolderLister, VideoInfoSource};
use ferry_metadata::MetadataStore;
use ferry_queue::{Broker, Publisher};
use ferry_storage::ObjectStore;
use std::sync::Arc;
use time::OffsetDateTime;

/// Explicitly constructed handles the workers operate on.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<AppConfig>,
    pub metadata: Arc<dyn MetadataStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub broker: Arc<dyn Broker>,
    pub publisher: Publisher,
    pub lister: Arc<dyn FolderLister>,
    pub video_info: Arc<dyn VideoInfoSource>,
}

impl WorkerContext {
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        broker: Arc<dyn Broker>,
        lister: Arc<dyn FolderLister>,
        video_info: Arc<dyn VideoInfoSource>,
    ) -> Self {
        let publisher = Publisher::new(broker.clone()).with_app_id("ferryd");
        Self {
            config: Arc::new(config),
            metadata,
            storage,
            broker,
            publisher,
            lister,
            video_info,
        }
    }

    /// Lease the longest-idle usable credential for `key`.
    pub async fn lease(&self, key: CredentialKey) -> WorkerResult<Credential> {
        match self
            .metadata
            .lease_credential(key.as_str(), OffsetDateTime::now_utc())
            .await?
        {
            Some(row) => Ok(row.into()),
            None => {
                metrics::CREDENTIAL_LEASE_MISSES
                    .with_label_values(&[key.as_str()])
                    .inc();
                Err(WorkerError::QuotaExhausted(key))
            }
        }
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("metadata", &self.metadata.backend_name())
            .field("storage", &self.storage.backend_name())
            .field("broker", &self.broker.backend_name())
            .finish_non_exhaustive()
    }
}
