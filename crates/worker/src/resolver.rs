//! Source resolver.
//!
//! Resolves one item to its playback links, stores the result and fans out
//! `clone_count` upload requests, each paired with its own leased API key and
//! session cookie. Every lease is taken before anything is published, so a
//! quota miss leaves the queue untouched and the request is retried later.

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use async_trait::async_trait;
use ferry_core::{CredentialKey, ResolveRequest, UploadRequest};
use ferry_metadata::models::SourceRow;
use ferry_queue::{Handler, HandlerOutcome, MessageMeta};
use time::OffsetDateTime;
use tracing::{info, warn};

pub struct SourceResolver {
    ctx: WorkerContext,
}

impl SourceResolver {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Resolve and fan out. Returns the number of upload requests published.
    pub async fn resolve(&self, request: &ResolveRequest) -> WorkerResult<usize> {
        let clone_count = self.ctx.config.resolver.clone_count;
        let info = self.ctx.video_info.video_info(&request.drive_id).await?;
        let item = info.into_source_item(request.user_id, clone_count);

        self.ctx
            .metadata
            .upsert_source(&SourceRow::from_item(&item, OffsetDateTime::now_utc())?)
            .await?;

        let mut uploads = Vec::with_capacity(clone_count as usize);
        for _ in 0..clone_count {
            let api_key = self.ctx.lease(CredentialKey::ApiKey).await?;
            let cookie = self.ctx.lease(CredentialKey::SessionCookie).await?;
            uploads.push(UploadRequest {
                cookie: cookie.value,
                email: cookie.group,
                driveid: item.item_id.clone(),
                apikey: api_key.value,
            });
        }

        for upload in &uploads {
            self.ctx.publisher.publish(upload).await?;
        }
        Ok(uploads.len())
    }
}

#[async_trait]
impl Handler for SourceResolver {
    type Message = ResolveRequest;

    fn name(&self) -> &'static str {
        "resolver"
    }

    async fn handle(&self, message: ResolveRequest, meta: &MessageMeta) -> HandlerOutcome {
        match self.resolve(&message).await {
            Ok(published) => {
                info!(item_id = %message.drive_id, published, "source resolved");
                HandlerOutcome::Done
            }
            Err(e) => {
                warn!(
                    item_id = %message.drive_id,
                    message_id = ?meta.message_id,
                    error = %e,
                    "source resolution failed"
                );
                e.outcome(self.ctx.config.resolver.retry_after())
            }
        }
    }
}
