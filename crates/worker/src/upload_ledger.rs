//! Upload ledger.
//!
//! Copies every upload request into `upload_queue_logs` as a `ready` row
//! keyed by its message id. Redeliveries hit the existing row and are
//! ignored.

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use async_trait::async_trait;
use ferry_core::{UploadRequest, UploadStatus};
use ferry_metadata::models::UploadLogRow;
use ferry_queue::{Handler, HandlerOutcome, MessageMeta};
use time::OffsetDateTime;
use tracing::debug;

pub struct UploadLedger {
    ctx: WorkerContext,
}

impl UploadLedger {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Returns false when the message id was already recorded.
    pub async fn record(&self, message_id: &str, request: &UploadRequest) -> WorkerResult<bool> {
        let row = UploadLogRow {
            message_id: message_id.to_string(),
            item_id: request.driveid.clone(),
            owner_group: request.email.clone(),
            status: UploadStatus::Ready.as_str().to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        Ok(self.ctx.metadata.record_upload(&row).await?)
    }
}

#[async_trait]
impl Handler for UploadLedger {
    type Message = UploadRequest;

    fn name(&self) -> &'static str {
        "upload_ledger"
    }

    async fn handle(&self, message: UploadRequest, meta: &MessageMeta) -> HandlerOutcome {
        let Some(message_id) = meta.message_id.as_deref().filter(|id| !id.is_empty()) else {
            return WorkerError::Validation("message id is required".to_string())
                .outcome(self.ctx.config.resolver.retry_after());
        };

        match self.record(message_id, &message).await {
            Ok(inserted) => {
                debug!(message_id, item_id = %message.driveid, inserted, "upload recorded");
                HandlerOutcome::Done
            }
            Err(e) => e.outcome(self.ctx.config.resolver.retry_after()),
        }
    }
}
