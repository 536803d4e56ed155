//! Tree extractor integration tests.

mod common;

use common::{Harness, seed_credential};
use ferry_core::{CredentialKey, ExportRequest, ExtractionStatus, Message, ResolveRequest};
use ferry_queue::{Handler, HandlerOutcome, MessageMeta};
use ferry_worker::WorkerError;
use ferry_worker::extractor::TreeExtractor;
use std::collections::BTreeSet;

/// Create a pending job and renumber it to `job_id`.
async fn job_with_id(h: &Harness, root_id: &str, owner_id: i64, job_id: i64) -> i64 {
    let created = h
        .store()
        .create_extraction_job(root_id, owner_id)
        .await
        .unwrap();
    sqlx::query("UPDATE user_drives SET id = ? WHERE id = ?")
        .bind(job_id)
        .bind(created)
        .execute(h.metadata.pool())
        .await
        .unwrap();
    job_id
}

fn request(root_id: Option<&str>, job_id: i64) -> ExportRequest {
    ExportRequest {
        drive_id: root_id.map(str::to_string),
        id: Some(job_id),
        api_key: None,
    }
}

async fn job_status(h: &Harness, job_id: i64) -> (ExtractionStatus, i64) {
    let job = h
        .store()
        .get_extraction_job(job_id)
        .await
        .unwrap()
        .unwrap()
        .into_job()
        .unwrap();
    (job.status, job.total_items)
}

fn lines(blob: &[u8]) -> BTreeSet<String> {
    String::from_utf8(blob.to_vec())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// R -> {a, b, F}, F -> {c, G}, G -> {d, e} with G paginated.
fn populate_tree(h: &Harness) {
    h.drive.page("R", None, &["a", "b"], &["F"], None);
    h.drive.page("F", None, &["c"], &["G"], None);
    h.drive.page("G", None, &["d"], &[], Some("g2"));
    h.drive.page("G", Some("g2"), &["e"], &["F"], None);
}

#[tokio::test]
async fn test_extract_writes_log_and_debits_balance() {
    let h = Harness::new().await;
    seed_credential(&h.store(), CredentialKey::ApiKey, "shared", "key-1").await;
    h.drive.page("R1", None, &["a", "b"], &["F"], None);
    h.drive.page("F", None, &["c"], &[], None);
    let job_id = job_with_id(&h, "R1", 7, 42).await;

    let extractor = TreeExtractor::new(h.ctx.clone());
    let total = extractor
        .extract(job_id, &request(Some("R1"), job_id))
        .await
        .unwrap();
    assert_eq!(total, 3);

    assert_eq!(job_status(&h, job_id).await, (ExtractionStatus::Finished, 3));

    let blob = h.storage.get("R1_42").await.unwrap();
    assert_eq!(&blob[..], b"a\nb\nc\n");

    let debits = h.store().list_balance_entries(7).await.unwrap();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].amount, -3);
    assert_eq!(debits[0].source_id, 42);
    assert_eq!(debits[0].transaction_type, "EXPORT_DRIVE");

    assert!(!h.temp_dir.path().join("tmp").join("R1_42").exists());
    assert!(h.broker.ready_messages("source").is_empty());
}

#[tokio::test]
async fn test_extract_follows_page_tokens() {
    let h = Harness::new().await;
    seed_credential(&h.store(), CredentialKey::ApiKey, "shared", "key-1").await;
    h.drive.page("R", None, &["x1", "x2"], &[], Some("p2"));
    h.drive.page("R", Some("p2"), &["x3"], &[], Some("p3"));
    h.drive.page("R", Some("p3"), &["x4"], &[], None);
    let job_id = h.store().create_extraction_job("R", 1).await.unwrap();

    let total = TreeExtractor::new(h.ctx.clone())
        .extract(job_id, &request(Some("R"), job_id))
        .await
        .unwrap();

    assert_eq!(total, 4);
    assert_eq!(h.drive.list_calls(), 3);
}

#[tokio::test]
async fn test_extract_result_independent_of_width_and_batch() {
    let mut results = Vec::new();
    for (width, batch) in [(1, 1), (4, 10), (2, 3)] {
        let h = Harness::with_config(|config| {
            config.extractor.worker_width = width;
            config.extractor.batch_size = batch;
        })
        .await;
        seed_credential(&h.store(), CredentialKey::ApiKey, "shared", "key-1").await;
        populate_tree(&h);
        let job_id = h.store().create_extraction_job("R", 1).await.unwrap();

        let total = TreeExtractor::new(h.ctx.clone())
            .extract(job_id, &request(Some("R"), job_id))
            .await
            .unwrap();
        let blob = h.storage.get(&format!("R_{job_id}")).await.unwrap();
        results.push((total, lines(&blob)));
    }

    let expected: BTreeSet<String> = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(str::to_string)
        .collect();
    for (total, leaves) in results {
        assert_eq!(total, 5);
        assert_eq!(leaves, expected);
    }
}

#[tokio::test]
async fn test_empty_tree_finishes_without_log() {
    let h = Harness::new().await;
    seed_credential(&h.store(), CredentialKey::ApiKey, "shared", "key-1").await;
    let job_id = h.store().create_extraction_job("EMPTY", 3).await.unwrap();

    let total = TreeExtractor::new(h.ctx.clone())
        .extract(job_id, &request(Some("EMPTY"), job_id))
        .await
        .unwrap();

    assert_eq!(total, 0);
    assert_eq!(job_status(&h, job_id).await, (ExtractionStatus::Finished, 0));
    assert!(!h.storage.exists(&format!("EMPTY_{job_id}")).await.unwrap());
    assert!(h.store().list_balance_entries(3).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_root_marks_job_error_and_acks() {
    let h = Harness::new().await;
    seed_credential(&h.store(), CredentialKey::ApiKey, "shared", "key-1").await;
    let job_id = h.store().create_extraction_job("R", 1).await.unwrap();

    let outcome = TreeExtractor::new(h.ctx.clone())
        .handle(request(None, job_id), &MessageMeta::default())
        .await;

    assert_eq!(outcome, HandlerOutcome::Done);
    assert_eq!(job_status(&h, job_id).await.0, ExtractionStatus::Error);
    assert_eq!(h.drive.list_calls(), 0);
}

#[tokio::test]
async fn test_unknown_job_is_acked() {
    let h = Harness::new().await;

    let outcome = TreeExtractor::new(h.ctx.clone())
        .handle(request(Some("R"), 999), &MessageMeta::default())
        .await;

    assert_eq!(outcome, HandlerOutcome::Done);
    assert!(h.store().get_extraction_job(999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_caller_api_key_used_when_pool_empty() {
    let h = Harness::new().await;
    h.drive.page("R", None, &["a"], &[], None);
    let job_id = h.store().create_extraction_job("R", 1).await.unwrap();

    let mut without_key = request(Some("R"), job_id);
    let extractor = TreeExtractor::new(h.ctx.clone());
    assert!(extractor.extract(job_id, &without_key).await.is_err());

    without_key.api_key = Some("caller-key".to_string());
    assert_eq!(extractor.extract(job_id, &without_key).await.unwrap(), 1);
}

#[tokio::test]
async fn test_forward_mode_publishes_resolve_requests() {
    let h = Harness::with_config(|config| config.extractor.forward_to_resolver = true).await;
    seed_credential(&h.store(), CredentialKey::ApiKey, "shared", "key-1").await;
    h.drive.page("R", None, &["a", "b"], &["F"], None);
    h.drive.page("F", None, &["c"], &[], None);
    let job_id = h.store().create_extraction_job("R", 7).await.unwrap();

    let total = TreeExtractor::new(h.ctx.clone())
        .extract(job_id, &request(Some("R"), job_id))
        .await
        .unwrap();
    assert_eq!(total, 3);

    let published: BTreeSet<String> = h
        .broker
        .ready_messages("source")
        .iter()
        .map(|m| {
            let msg = ResolveRequest::decode(&m.payload).unwrap();
            assert_eq!(msg.user_id, 7);
            msg.drive_id
        })
        .collect();
    assert_eq!(published.len(), 3);
    assert!(published.contains("c"));
    assert!(h.store().list_balance_entries(7).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_listing_failure_marks_error_and_cleans_up() {
    let h = Harness::new().await;
    seed_credential(&h.store(), CredentialKey::ApiKey, "shared", "key-1").await;
    h.drive.page("R", None, &["a", "b"], &[], Some("p2"));
    h.drive.fail_folder("R", Some("p2"), 500);
    let job_id = h.store().create_extraction_job("R", 7).await.unwrap();

    let outcome = TreeExtractor::new(h.ctx.clone())
        .handle(request(Some("R"), job_id), &MessageMeta::default())
        .await;

    assert_eq!(outcome, HandlerOutcome::Done);
    assert_eq!(h.drive.list_calls(), 2);
    assert_eq!(job_status(&h, job_id).await, (ExtractionStatus::Error, 0));
    assert!(!h.storage.exists(&format!("R_{job_id}")).await.unwrap());
    assert!(
        !h.temp_dir
            .path()
            .join("tmp")
            .join(format!("R_{job_id}"))
            .exists()
    );
    assert!(h.store().list_balance_entries(7).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_root_must_match_job_record() {
    let h = Harness::new().await;
    seed_credential(&h.store(), CredentialKey::ApiKey, "shared", "key-1").await;
    h.drive.page("OTHER", None, &["a"], &[], None);
    let job_id = h.store().create_extraction_job("R", 1).await.unwrap();

    let extractor = TreeExtractor::new(h.ctx.clone());
    let err = extractor
        .extract(job_id, &request(Some("OTHER"), job_id))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Validation(_)), "{err}");

    let outcome = extractor
        .handle(request(Some("OTHER"), job_id), &MessageMeta::default())
        .await;
    assert_eq!(outcome, HandlerOutcome::Done);
    assert_eq!(job_status(&h, job_id).await.0, ExtractionStatus::Error);
    assert_eq!(h.drive.list_calls(), 0);
}
