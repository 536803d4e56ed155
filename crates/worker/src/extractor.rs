//! Tree extractor.
//!
//! Walks a remote folder tree breadth first and records every leaf under the
//! root in a job log. Each round takes up to `batch_size` frontier entries and
//! lists them with at most `worker_width` requests in flight; the results are
//! folded back into the frontier in one place. Folders with more pages stay on
//! the frontier with their next page token.
//!
//! Job lifecycle: `pending -> extracting -> finished | error`. The delivery
//! is acknowledged whatever the outcome; failures are only visible on the job
//! record.

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::job::log_key;
use ferry_core::{
    BalanceEntry, CredentialKey, ExportRequest, ExtractionStatus, ResolveRequest,
};
use ferry_drive::{DriveResult, FolderPage};
use ferry_metadata::MetadataError;
use ferry_metadata::models::BalanceRow;
use ferry_queue::{Handler, HandlerOutcome, MessageMeta};
use futures::stream::{self, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{error, info, instrument, warn};

/// Local append-only list of discovered leaf ids, one per line.
struct JobLog {
    path: PathBuf,
    writer: BufWriter<fs::File>,
}

impl JobLog {
    async fn create(dir: &Path, key: &str) -> WorkerResult<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(key);
        let file = fs::File::create(&path).await?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    async fn append(&mut self, leaf_id: &str) -> WorkerResult<()> {
        self.writer.write_all(leaf_id.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Flush and return the full contents.
    async fn seal(&mut self) -> WorkerResult<Bytes> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        Ok(Bytes::from(fs::read(&self.path).await?))
    }
}

async fn remove_log(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove job log"),
    }
}

/// Breadth-first traversal state.
struct Traversal {
    frontier: VecDeque<(String, Option<String>)>,
    seen_folders: HashSet<String>,
    seen_leaves: HashSet<String>,
}

impl Traversal {
    fn new(root_id: &str) -> Self {
        Self {
            frontier: VecDeque::from([(root_id.to_string(), None)]),
            seen_folders: HashSet::from([root_id.to_string()]),
            seen_leaves: HashSet::new(),
        }
    }

    fn discovered(&self) -> usize {
        self.seen_leaves.len()
    }

    fn next_batch(&mut self, size: usize) -> Vec<(String, Option<String>)> {
        let take = size.min(self.frontier.len());
        self.frontier.drain(..take).collect()
    }

    /// Fold one listed page back in. Returns leaves not seen before.
    fn apply(&mut self, folder_id: String, page: FolderPage) -> Vec<String> {
        let fresh: Vec<String> = page
            .leaves
            .into_iter()
            .filter(|leaf| self.seen_leaves.insert(leaf.clone()))
            .collect();

        if let Some(token) = page.next_page_token {
            self.frontier.push_back((folder_id, Some(token)));
        }
        for folder in page.folders {
            if self.seen_folders.insert(folder.clone()) {
                self.frontier.push_back((folder, None));
            }
        }
        fresh
    }
}

pub struct TreeExtractor {
    ctx: WorkerContext,
}

impl TreeExtractor {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Run one job to completion. Returns the number of items discovered.
    #[instrument(skip(self, request))]
    pub async fn extract(&self, job_id: i64, request: &ExportRequest) -> WorkerResult<i64> {
        let root_id = request
            .drive_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WorkerError::Validation("drive_id is required".to_string()))?;
        let job = self
            .ctx
            .metadata
            .get_extraction_job(job_id)
            .await?
            .ok_or_else(|| WorkerError::Validation(format!("unknown job {job_id}")))?;
        if job.root_id != root_id {
            return Err(WorkerError::Validation(format!(
                "job {job_id} is rooted at {}, not {root_id}",
                job.root_id
            )));
        }

        self.ctx
            .metadata
            .update_job_status(job_id, ExtractionStatus::Extracting)
            .await?;

        let api_key = match self.ctx.lease(CredentialKey::ApiKey).await {
            Ok(credential) => credential.value,
            Err(WorkerError::QuotaExhausted(key)) => request
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or(WorkerError::QuotaExhausted(key))?,
            Err(e) => return Err(e),
        };

        let key = log_key(root_id, job_id);
        let mut log = JobLog::create(&self.ctx.config.extractor.tmp_dir, &key).await?;
        let result = self
            .run(job_id, job.owner_id, root_id, &api_key, &key, &mut log)
            .await;
        remove_log(&log.path).await;
        result
    }

    async fn run(
        &self,
        job_id: i64,
        owner_id: i64,
        root_id: &str,
        api_key: &str,
        key: &str,
        log: &mut JobLog,
    ) -> WorkerResult<i64> {
        let total = self.traverse(root_id, api_key, log).await?;

        self.ctx
            .metadata
            .finish_extraction_job(job_id, total)
            .await?;
        if total == 0 {
            return Ok(0);
        }

        let contents = log.seal().await?;
        self.ctx.storage.put(key, contents.clone()).await?;

        if self.ctx.config.extractor.forward_to_resolver {
            let ids = std::str::from_utf8(&contents)
                .map_err(|e| WorkerError::Validation(format!("job log is not utf-8: {e}")))?;
            for leaf in ids.lines().filter(|line| !line.is_empty()) {
                self.ctx
                    .publisher
                    .publish(&ResolveRequest {
                        drive_id: leaf.to_string(),
                        user_id: owner_id,
                    })
                    .await?;
            }
        } else {
            let entry =
                BalanceEntry::export_debit(owner_id, job_id, total, OffsetDateTime::now_utc());
            self.ctx
                .metadata
                .insert_balance_entry(&BalanceRow::from_entry(&entry))
                .await?;
        }
        Ok(total)
    }

    async fn traverse(
        &self,
        root_id: &str,
        api_key: &str,
        log: &mut JobLog,
    ) -> WorkerResult<i64> {
        let batch_size = self.ctx.config.extractor.batch_size;
        let width = self.ctx.config.extractor.worker_width;
        let lister = self.ctx.lister.clone();
        let mut traversal = Traversal::new(root_id);

        while !traversal.frontier.is_empty() {
            let batch = traversal.next_batch(batch_size);
            let pages: Vec<(String, DriveResult<FolderPage>)> = stream::iter(batch)
                .map(|(folder_id, token)| {
                    let lister = lister.clone();
                    async move {
                        let page = lister
                            .list_folder(&folder_id, api_key, token.as_deref())
                            .await;
                        (folder_id, page)
                    }
                })
                .buffer_unordered(width)
                .collect()
                .await;

            for (folder_id, page) in pages {
                for leaf in traversal.apply(folder_id, page?) {
                    log.append(&leaf).await?;
                }
            }
        }

        let total = traversal.discovered();
        metrics::ITEMS_DISCOVERED.inc_by(total as u64);
        Ok(total as i64)
    }

    async fn mark_failed(&self, job_id: i64) {
        match self
            .ctx
            .metadata
            .update_job_status(job_id, ExtractionStatus::Error)
            .await
        {
            Ok(()) | Err(MetadataError::NotFound(_)) => {}
            Err(e) => error!(job_id, error = %e, "failed to record job error"),
        }
    }
}

#[async_trait]
impl Handler for TreeExtractor {
    type Message = ExportRequest;

    fn name(&self) -> &'static str {
        "extractor"
    }

    async fn handle(&self, message: ExportRequest, _meta: &MessageMeta) -> HandlerOutcome {
        let Some(job_id) = message.id else {
            return HandlerOutcome::fatal("id is required");
        };

        match self.extract(job_id, &message).await {
            Ok(total) => {
                metrics::EXTRACTION_JOBS
                    .with_label_values(&[ExtractionStatus::Finished.as_str()])
                    .inc();
                info!(job_id, total, "extraction finished");
            }
            Err(e) => {
                metrics::EXTRACTION_JOBS
                    .with_label_values(&[ExtractionStatus::Error.as_str()])
                    .inc();
                error!(job_id, error = %e, kind = e.kind(), "extraction failed");
                self.mark_failed(job_id).await;
            }
        }
        HandlerOutcome::Done
    }
}
