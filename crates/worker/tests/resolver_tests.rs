//! Source resolver integration tests.

mod common;

use common::{Harness, seed_credential, seed_pair};
use ferry_core::{CredentialKey, Message, ResolveRequest, UploadRequest};
use ferry_drive::DriveError;
use ferry_queue::{Handler, HandlerOutcome, MessageMeta};
use ferry_worker::WorkerError;
use ferry_worker::resolver::SourceResolver;
use std::collections::HashSet;
use std::time::Duration;

fn resolve(item_id: &str) -> ResolveRequest {
    ResolveRequest {
        drive_id: item_id.to_string(),
        user_id: 7,
    }
}

#[tokio::test]
async fn test_resolve_stores_source_and_fans_out() {
    let h = Harness::new().await;
    h.drive.video("item-1");
    for group in ["a@example.com", "b@example.com", "c@example.com"] {
        seed_pair(&h.store(), group).await;
    }

    let published = SourceResolver::new(h.ctx.clone())
        .resolve(&resolve("item-1"))
        .await
        .unwrap();
    assert_eq!(published, 3);

    let source = h
        .store()
        .get_source("item-1")
        .await
        .unwrap()
        .unwrap()
        .into_item()
        .unwrap();
    assert_eq!(source.owner_id, 7);
    assert_eq!(source.credential_value, "stream-session");
    assert_eq!(source.clone_count, 3);
    assert_eq!(source.candidate_links.len(), 2);

    let uploads: Vec<UploadRequest> = h
        .broker
        .ready_messages("upload")
        .iter()
        .map(|m| UploadRequest::decode(&m.payload).unwrap())
        .collect();
    assert_eq!(uploads.len(), 3);
    let groups: HashSet<&str> = uploads.iter().map(|u| u.email.as_str()).collect();
    assert_eq!(groups.len(), 3, "each clone gets its own cookie");
    for upload in &uploads {
        assert_eq!(upload.driveid, "item-1");
        assert_eq!(upload.cookie, format!("SID={}", upload.email));
    }

    // Every upload is copied to the ledger queue.
    assert_eq!(h.broker.ready_messages("upload_logs").len(), 3);
}

#[tokio::test]
async fn test_rejected_item_writes_nothing() {
    let h = Harness::new().await;
    h.drive.reject("item-1", "fail");
    seed_pair(&h.store(), "a@example.com").await;

    let resolver = SourceResolver::new(h.ctx.clone());
    let err = resolver.resolve(&resolve("item-1")).await.unwrap_err();
    assert!(matches!(
        err,
        WorkerError::Upstream(DriveError::UpstreamRejected { .. })
    ));

    let outcome = resolver
        .handle(resolve("item-1"), &MessageMeta::default())
        .await;
    assert!(matches!(outcome, HandlerOutcome::Fatal { .. }));

    assert!(h.store().get_source("item-1").await.unwrap().is_none());
    assert!(h.broker.ready_messages("upload").is_empty());
}

#[tokio::test]
async fn test_quota_miss_publishes_nothing_and_retries() {
    let h = Harness::with_config(|config| config.resolver.retry_after_secs = 60).await;
    h.drive.video("item-1");
    seed_credential(&h.store(), CredentialKey::ApiKey, "shared", "key-1").await;

    let outcome = SourceResolver::new(h.ctx.clone())
        .handle(resolve("item-1"), &MessageMeta::default())
        .await;

    match outcome {
        HandlerOutcome::Retryable { backoff, .. } => {
            assert_eq!(backoff, Duration::from_secs(60))
        }
        other => panic!("expected retry, got {other:?}"),
    }
    assert!(h.broker.ready_messages("upload").is_empty());
    assert!(h.broker.ready_messages("upload_logs").is_empty());
}

#[tokio::test]
async fn test_unavailable_upstream_is_retried_later() {
    let h = Harness::with_config(|config| config.resolver.retry_after_secs = 60).await;
    h.drive.fail_video("item-1", 503);
    seed_pair(&h.store(), "a@example.com").await;

    let outcome = SourceResolver::new(h.ctx.clone())
        .handle(resolve("item-1"), &MessageMeta::default())
        .await;

    match outcome {
        HandlerOutcome::Retryable { backoff, reason } => {
            assert_eq!(backoff, Duration::from_secs(60));
            assert!(reason.contains("status 503"), "{reason}");
        }
        other => panic!("expected retry, got {other:?}"),
    }
    assert!(h.store().get_source("item-1").await.unwrap().is_none());
    assert!(h.broker.ready_messages("upload").is_empty());

    // A client error from the same endpoint is terminal.
    h.drive.fail_video("item-1", 404);
    let outcome = SourceResolver::new(h.ctx.clone())
        .handle(resolve("item-1"), &MessageMeta::default())
        .await;
    assert!(matches!(outcome, HandlerOutcome::Fatal { .. }));
}
