//! S3 backend tests against MinIO. Set SKIP_S3_TESTS=1 to skip.

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use bytes::Bytes;
use ferry_storage::{ObjectStore, S3Backend, StorageError};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::{ContainerAsync, GenericImage, ImageExt, runners::AsyncRunner};

const MINIO_IMAGE: &str = "minio/minio";
const MINIO_TAG: &str = "RELEASE.2024-02-12T21-36-45Z";
const BUCKET: &str = "ferry-test";

fn should_skip_s3_tests() -> bool {
    std::env::var("SKIP_S3_TESTS").is_ok()
}

struct MinioContext {
    _container: ContainerAsync<GenericImage>,
    endpoint: String,
    access_key: String,
    secret_key: String,
}

impl MinioContext {
    async fn new() -> Result<Self, String> {
        let access_key = "minio-access-key".to_string();
        let secret_key = "minio-secret-key".to_string();

        let container: ContainerAsync<GenericImage> = GenericImage::new(MINIO_IMAGE, MINIO_TAG)
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("API:"))
            .with_env_var("MINIO_ROOT_USER", access_key.clone())
            .with_env_var("MINIO_ROOT_PASSWORD", secret_key.clone())
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .map_err(|e| format!("failed to start MinIO container: {e}"))?;

        let host = container
            .get_host()
            .await
            .map_err(|e| format!("failed to get host: {e}"))?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .map_err(|e| format!("failed to get port: {e}"))?;

        Ok(Self {
            _container: container,
            endpoint: format!("http://{host}:{port}"),
            access_key,
            secret_key,
        })
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), String> {
        let credentials = Credentials::new(
            self.access_key.clone(),
            self.secret_key.clone(),
            None,
            None,
            "test",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .credentials_provider(credentials)
            .endpoint_url(self.endpoint.clone())
            .force_path_style(true)
            .build();

        Client::from_conf(config)
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| format!("failed to create bucket: {e}"))?;
        Ok(())
    }
}

struct S3TestHarness {
    _context: MinioContext,
    backend: S3Backend,
}

impl S3TestHarness {
    async fn new(prefix: Option<String>) -> Result<Self, String> {
        let context = MinioContext::new().await?;
        context.create_bucket(BUCKET).await?;

        let backend = S3Backend::new(
            BUCKET,
            Some(context.endpoint.clone()),
            Some("us-east-1".to_string()),
            prefix,
            Some(context.access_key.clone()),
            Some(context.secret_key.clone()),
            true,
        )
        .await
        .map_err(|e| format!("failed to create S3 backend: {e}"))?;

        Ok(Self {
            _context: context,
            backend,
        })
    }
}

async fn harness_or_skip(prefix: Option<&str>) -> Option<S3TestHarness> {
    if should_skip_s3_tests() {
        return None;
    }
    match S3TestHarness::new(prefix.map(str::to_string)).await {
        Ok(harness) => Some(harness),
        Err(err) => {
            eprintln!("Skipping S3 test: {err}");
            None
        }
    }
}

#[tokio::test]
async fn test_s3_job_log_lifecycle() {
    let Some(harness) = harness_or_skip(Some("logs")).await else {
        return;
    };
    let backend = &harness.backend;
    backend.health_check().await.unwrap();

    assert!(!backend.exists("R1_42").await.unwrap());
    backend
        .put("R1_42", Bytes::from_static(b"a\nb\nc\n"))
        .await
        .unwrap();
    assert!(backend.exists("R1_42").await.unwrap());
    assert_eq!(
        backend.get("R1_42").await.unwrap(),
        Bytes::from_static(b"a\nb\nc\n")
    );

    // A rerun of the same job replaces the log.
    backend
        .put("R1_42", Bytes::from_static(b"a\n"))
        .await
        .unwrap();
    assert_eq!(backend.get("R1_42").await.unwrap(), Bytes::from_static(b"a\n"));

    backend.delete("R1_42").await.unwrap();
    match backend.get("R1_42").await {
        Err(StorageError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}
