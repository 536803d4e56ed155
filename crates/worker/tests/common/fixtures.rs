//! Fakes for the drive and broker seams plus a ready-to-use worker context.

use super::metadata::TestMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::config::AppConfig;
use ferry_core::{CandidateLink, CredentialKey, QueueBinding, topology};
use ferry_drive::{DriveError, DriveResult, FolderLister, FolderPage, VideoInfo, VideoInfoSource};
use ferry_metadata::MetadataStore;
use ferry_metadata::models::NewCredential;
use ferry_queue::{
    Broker, MemoryBroker, Properties, QueueError, QueueResult, Subscription, declare_topology,
};
use ferry_storage::{FilesystemBackend, ObjectStore};
use ferry_worker::WorkerContext;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Canned drive responses.
#[derive(Default)]
pub struct FakeDrive {
    pages: Mutex<HashMap<(String, Option<String>), FolderPage>>,
    videos: Mutex<HashMap<String, VideoInfo>>,
    rejected: Mutex<HashMap<String, String>>,
    failing_pages: Mutex<HashMap<(String, Option<String>), u16>>,
    failing_videos: Mutex<HashMap<String, u16>>,
    list_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeDrive {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register the page served for `folder_id` at `token`.
    pub fn page(
        &self,
        folder_id: &str,
        token: Option<&str>,
        leaves: &[&str],
        folders: &[&str],
        next: Option<&str>,
    ) {
        self.pages.lock().unwrap().insert(
            (folder_id.to_string(), token.map(str::to_string)),
            FolderPage {
                leaves: leaves.iter().map(|s| s.to_string()).collect(),
                folders: folders.iter().map(|s| s.to_string()).collect(),
                next_page_token: next.map(str::to_string),
            },
        );
    }

    pub fn video(&self, item_id: &str) {
        self.videos.lock().unwrap().insert(
            item_id.to_string(),
            VideoInfo {
                item_id: item_id.to_string(),
                title: format!("{item_id}.mp4"),
                duration: 120,
                session_token: "stream-session".to_string(),
                links: vec![
                    CandidateLink::new(22, format!("https://cdn.test/{item_id}/22")),
                    CandidateLink::new(18, format!("https://cdn.test/{item_id}/18")),
                ],
                expiry: Some(1_700_000_000),
            },
        );
    }

    pub fn reject(&self, item_id: &str, reason: &str) {
        self.rejected
            .lock()
            .unwrap()
            .insert(item_id.to_string(), reason.to_string());
    }

    /// Answer the listing of `folder_id` at `token` with an HTTP error.
    pub fn fail_folder(&self, folder_id: &str, token: Option<&str>, status_code: u16) {
        self.failing_pages.lock().unwrap().insert(
            (folder_id.to_string(), token.map(str::to_string)),
            status_code,
        );
    }

    /// Answer the video info for `item_id` with an HTTP error.
    pub fn fail_video(&self, item_id: &str, status_code: u16) {
        self.failing_videos
            .lock()
            .unwrap()
            .insert(item_id.to_string(), status_code);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FolderLister for FakeDrive {
    async fn list_folder(
        &self,
        folder_id: &str,
        _api_key: &str,
        page_token: Option<&str>,
    ) -> DriveResult<FolderPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let key = (folder_id.to_string(), page_token.map(str::to_string));
        if let Some(&status_code) = self.failing_pages.lock().unwrap().get(&key) {
            return Err(DriveError::Api {
                status_code,
                message: format!("listing {folder_id} failed"),
            });
        }
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl VideoInfoSource for FakeDrive {
    async fn video_info(&self, item_id: &str) -> DriveResult<VideoInfo> {
        if let Some(&status_code) = self.failing_videos.lock().unwrap().get(item_id) {
            return Err(DriveError::Api {
                status_code,
                message: "unavailable".to_string(),
            });
        }
        if let Some(reason) = self.rejected.lock().unwrap().get(item_id) {
            return Err(DriveError::UpstreamRejected {
                item_id: item_id.to_string(),
                reason: reason.clone(),
            });
        }
        self.videos
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .ok_or_else(|| DriveError::UpstreamRejected {
                item_id: item_id.to_string(),
                reason: "status fail".to_string(),
            })
    }
}

/// Memory broker whose next `failures` publishes error out.
pub struct FlakyBroker {
    inner: MemoryBroker,
    failures: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyBroker {
    pub fn new(inner: MemoryBroker, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn declare(&self, binding: QueueBinding) -> QueueResult<()> {
        self.inner.declare(binding).await
    }

    async fn publish(
        &self,
        routing_key: &str,
        properties: Properties,
        payload: Bytes,
    ) -> QueueResult<()> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(QueueError::Backend("injected publish failure".to_string()));
        }
        self.inner.publish(routing_key, properties, payload).await
    }

    async fn subscribe(&self, queue: &str) -> QueueResult<Box<dyn Subscription>> {
        self.inner.subscribe(queue).await
    }

    async fn health_check(&self) -> QueueResult<()> {
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// A worker context over SQLite, a temp directory and a memory broker.
#[allow(dead_code)]
pub struct Harness {
    pub ctx: WorkerContext,
    pub broker: MemoryBroker,
    pub drive: Arc<FakeDrive>,
    pub storage: Arc<dyn ObjectStore>,
    pub metadata: TestMetadata,
    pub temp_dir: TempDir,
}

#[allow(dead_code)]
impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let broker = MemoryBroker::new();
        Self::build(broker.clone(), Arc::new(broker), configure).await
    }

    /// Route publishes through `transport`; `broker` is what assertions read.
    pub async fn build(
        broker: MemoryBroker,
        transport: Arc<dyn Broker>,
        configure: impl FnOnce(&mut AppConfig),
    ) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let metadata = TestMetadata::new()
            .await
            .expect("Failed to create test metadata");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(temp_dir.path().join("logs"))
                .await
                .expect("Failed to create storage"),
        );
        declare_topology(&broker, &topology::bindings())
            .await
            .expect("Failed to declare topology");

        let mut config = AppConfig::for_testing();
        config.extractor.tmp_dir = temp_dir.path().join("tmp");
        configure(&mut config);

        let drive = FakeDrive::new();
        let ctx = WorkerContext::new(
            config,
            metadata.store(),
            storage.clone(),
            transport,
            drive.clone(),
            drive.clone(),
        );

        Self {
            ctx,
            broker,
            drive,
            storage,
            metadata,
            temp_dir,
        }
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.metadata.store()
    }
}

/// Insert one active credential.
#[allow(dead_code)]
pub async fn seed_credential(
    store: &Arc<dyn MetadataStore>,
    key: CredentialKey,
    group: &str,
    value: &str,
) -> i64 {
    store
        .insert_credential(&NewCredential::active(key.as_str(), group, value))
        .await
        .expect("Failed to seed credential")
}

/// Insert one API key and one session cookie for `group`.
#[allow(dead_code)]
pub async fn seed_pair(store: &Arc<dyn MetadataStore>, group: &str) {
    seed_credential(store, CredentialKey::ApiKey, "shared", &format!("key-{group}")).await;
    seed_credential(
        store,
        CredentialKey::SessionCookie,
        group,
        &format!("SID={group}"),
    )
    .await;
}
