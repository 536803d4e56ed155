//! Credential invalidator.
//!
//! A revoked session cookie takes its whole owner group out of rotation.
//! Every upload still `ready` for that group is cascaded to the recheck
//! queue and then cancelled in one transaction. Publish failures are counted
//! but do not hold back the ledger update.

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::metrics;
use async_trait::async_trait;
use ferry_core::{CookieRevoked, CredentialKey, RecheckRequest, UploadStatus};
use ferry_queue::{Handler, HandlerOutcome, MessageMeta};
use tracing::{info, warn};

/// Result of one revocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CascadeSummary {
    pub disabled: u64,
    pub cascaded: usize,
    pub publish_failures: usize,
    pub cancelled: u64,
}

pub struct CredentialInvalidator {
    ctx: WorkerContext,
}

impl CredentialInvalidator {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub async fn revoke(&self, group: &str) -> WorkerResult<CascadeSummary> {
        let metadata = &self.ctx.metadata;
        let disabled = metadata
            .disable_credentials(CredentialKey::SessionCookie.as_str(), group)
            .await?;

        let pending = metadata.list_uploads(group, UploadStatus::Ready).await?;
        let mut publish_failures = 0;
        for row in &pending {
            let recheck = RecheckRequest {
                email: group.to_string(),
                driveid: row.item_id.clone(),
            };
            if let Err(e) = self.ctx.publisher.publish(&recheck).await {
                publish_failures += 1;
                metrics::CASCADE_PUBLISH_FAILURES.inc();
                warn!(group, item_id = %row.item_id, error = %e, "failed to cascade recheck");
            }
        }

        let ids: Vec<String> = pending.iter().map(|r| r.message_id.clone()).collect();
        let cancelled = metadata.mark_uploads(&ids, UploadStatus::Cancel).await?;

        Ok(CascadeSummary {
            disabled,
            cascaded: pending.len(),
            publish_failures,
            cancelled,
        })
    }
}

#[async_trait]
impl Handler for CredentialInvalidator {
    type Message = CookieRevoked;

    fn name(&self) -> &'static str {
        "invalidator"
    }

    async fn handle(&self, message: CookieRevoked, meta: &MessageMeta) -> HandlerOutcome {
        match self.revoke(&message.email).await {
            Ok(summary) => {
                info!(
                    group = %message.email,
                    disabled = summary.disabled,
                    cascaded = summary.cascaded,
                    publish_failures = summary.publish_failures,
                    cancelled = summary.cancelled,
                    "credential revoked"
                );
                HandlerOutcome::Done
            }
            Err(e) => {
                warn!(group = %message.email, message_id = ?meta.message_id, error = %e, "revocation failed");
                e.outcome(self.ctx.config.recheck.no_credential_backoff())
            }
        }
    }
}
