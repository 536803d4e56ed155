//! Recheck loop.
//!
//! Gives an item whose cookie was revoked another upload attempt with a
//! fresh credential pair. When nothing is leasable the message is held for
//! `no_credential_backoff` and requeued, never acknowledged.

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use async_trait::async_trait;
use ferry_core::credential::RATE_LIMIT_WINDOW;
use ferry_core::{CredentialKey, RecheckRequest, UploadRequest};
use ferry_queue::{Handler, HandlerOutcome, MessageMeta};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub struct RecheckWorker {
    ctx: WorkerContext,
}

impl RecheckWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Returns the message id of the published upload request.
    pub async fn recheck(&self, request: &RecheckRequest) -> WorkerResult<String> {
        let until = OffsetDateTime::now_utc() + RATE_LIMIT_WINDOW;
        match self
            .ctx
            .metadata
            .rate_limit_credentials(CredentialKey::SessionCookie.as_str(), &request.email, until)
            .await
        {
            Ok(changed) => debug!(group = %request.email, changed, "cookie rate limited"),
            Err(e) => warn!(group = %request.email, error = %e, "failed to rate limit cookie"),
        }

        let api_key = self.ctx.lease(CredentialKey::ApiKey).await?;
        let cookie = self.ctx.lease(CredentialKey::SessionCookie).await?;

        let upload = UploadRequest {
            cookie: cookie.value,
            email: cookie.group,
            driveid: request.driveid.clone(),
            apikey: api_key.value,
        };
        Ok(self.ctx.publisher.publish(&upload).await?)
    }
}

#[async_trait]
impl Handler for RecheckWorker {
    type Message = RecheckRequest;

    fn name(&self) -> &'static str {
        "recheck"
    }

    async fn handle(&self, message: RecheckRequest, meta: &MessageMeta) -> HandlerOutcome {
        let throttle = self.ctx.config.recheck.throttle();
        if !throttle.is_zero() {
            tokio::time::sleep(throttle).await;
        }

        match self.recheck(&message).await {
            Ok(upload_id) => {
                info!(item_id = %message.driveid, %upload_id, "item resubmitted");
                HandlerOutcome::Done
            }
            Err(e) => {
                debug!(item_id = %message.driveid, message_id = ?meta.message_id, error = %e, "recheck deferred");
                e.outcome(self.ctx.config.recheck.no_credential_backoff())
            }
        }
    }
}
