//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{BalanceRepo, CredentialRepo, JobRepo, SourceRepo, UploadLedgerRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    CredentialRepo + JobRepo + SourceRepo + UploadLedgerRepo + BalanceRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Close the connection pool. Later calls fail.
    async fn close(&self);

    /// Backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and migrate it.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // A single connection serializes writers; concurrent lease claims
        // would otherwise race into "database is locked".
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use ferry_core::{CredentialStatus, ExtractionStatus, UploadStatus};
    use time::OffsetDateTime;

    const CREDENTIAL_COLUMNS: &str =
        r#"id, key, "group", value, expired_to, status, last_leased_at"#;

    #[async_trait]
    impl CredentialRepo for SqliteStore {
        async fn insert_credential(&self, credential: &NewCredential) -> MetadataResult<i64> {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO configs (key, "group", value, expired_to, status, last_leased_at, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(&credential.key)
            .bind(&credential.group)
            .bind(&credential.value)
            .bind(credential.expired_to)
            .bind(credential.status.as_flag())
            .bind(credential.last_leased_at)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await?;
            Ok(id)
        }

        async fn lease_credential(
            &self,
            key: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<Option<CredentialRow>> {
            let row = sqlx::query_as::<_, CredentialRow>(&format!(
                r#"
                UPDATE configs SET last_leased_at = ?
                WHERE id = (
                    SELECT id FROM configs
                    WHERE key = ? AND status = ? AND (expired_to IS NULL OR expired_to < ?)
                    ORDER BY last_leased_at ASC NULLS FIRST, id ASC
                    LIMIT 1
                )
                RETURNING {CREDENTIAL_COLUMNS}
                "#
            ))
            .bind(unix_micros(now))
            .bind(key)
            .bind(CredentialStatus::Active.as_flag())
            .bind(now.unix_timestamp())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn disable_credentials(&self, key: &str, group: &str) -> MetadataResult<u64> {
            let result = sqlx::query(r#"UPDATE configs SET status = ? WHERE key = ? AND "group" = ?"#)
                .bind(CredentialStatus::Inactive.as_flag())
                .bind(key)
                .bind(group)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn rate_limit_credentials(
            &self,
            key: &str,
            group: &str,
            until: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            let result =
                sqlx::query(r#"UPDATE configs SET expired_to = ? WHERE key = ? AND "group" = ?"#)
                    .bind(until.unix_timestamp())
                    .bind(key)
                    .bind(group)
                    .execute(&mut *tx)
                    .await?;
            tx.commit().await?;
            Ok(result.rows_affected())
        }

        async fn get_credentials(
            &self,
            key: &str,
            group: &str,
        ) -> MetadataResult<Vec<CredentialRow>> {
            let rows = sqlx::query_as::<_, CredentialRow>(&format!(
                r#"SELECT {CREDENTIAL_COLUMNS} FROM configs WHERE key = ? AND "group" = ? ORDER BY id"#
            ))
            .bind(key)
            .bind(group)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl JobRepo for SqliteStore {
        async fn create_extraction_job(&self, root_id: &str, owner_id: i64) -> MetadataResult<i64> {
            let now = OffsetDateTime::now_utc();
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO user_drives (root_id, owner_id, total_items, status, created_at, updated_at)
                VALUES (?, ?, 0, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(root_id)
            .bind(owner_id)
            .bind(ExtractionStatus::Pending.as_str())
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(id)
        }

        async fn get_extraction_job(
            &self,
            job_id: i64,
        ) -> MetadataResult<Option<ExtractionJobRow>> {
            let row = sqlx::query_as::<_, ExtractionJobRow>(
                "SELECT id, root_id, owner_id, total_items, status, created_at, updated_at FROM user_drives WHERE id = ?",
            )
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn update_job_status(
            &self,
            job_id: i64,
            status: ExtractionStatus,
        ) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE user_drives SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(OffsetDateTime::now_utc())
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("extraction job {job_id}")));
            }
            Ok(())
        }

        async fn finish_extraction_job(&self, job_id: i64, total_items: i64) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE user_drives SET status = ?, total_items = ?, updated_at = ? WHERE id = ?",
            )
            .bind(ExtractionStatus::Finished.as_str())
            .bind(total_items)
            .bind(OffsetDateTime::now_utc())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("extraction job {job_id}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SourceRepo for SqliteStore {
        async fn upsert_source(&self, source: &SourceRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO sources (item_id, owner_id, title, duration, credential_value, expiry,
                                     candidate_links, clone_count, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(item_id) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    title = excluded.title,
                    duration = excluded.duration,
                    credential_value = excluded.credential_value,
                    expiry = excluded.expiry,
                    candidate_links = excluded.candidate_links,
                    clone_count = excluded.clone_count,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&source.item_id)
            .bind(source.owner_id)
            .bind(&source.title)
            .bind(source.duration)
            .bind(&source.credential_value)
            .bind(source.expiry)
            .bind(&source.candidate_links)
            .bind(source.clone_count)
            .bind(source.created_at)
            .bind(source.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_source(&self, item_id: &str) -> MetadataResult<Option<SourceRow>> {
            let row = sqlx::query_as::<_, SourceRow>("SELECT * FROM sources WHERE item_id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl UploadLedgerRepo for SqliteStore {
        async fn record_upload(&self, entry: &UploadLogRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT INTO upload_queue_logs (message_id, item_id, owner_group, status, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(message_id) DO NOTHING
                "#,
            )
            .bind(&entry.message_id)
            .bind(&entry.item_id)
            .bind(&entry.owner_group)
            .bind(&entry.status)
            .bind(entry.created_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_upload(&self, message_id: &str) -> MetadataResult<Option<UploadLogRow>> {
            let row = sqlx::query_as::<_, UploadLogRow>(
                "SELECT * FROM upload_queue_logs WHERE message_id = ?",
            )
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_uploads(
            &self,
            owner_group: &str,
            status: UploadStatus,
        ) -> MetadataResult<Vec<UploadLogRow>> {
            let rows = sqlx::query_as::<_, UploadLogRow>(
                "SELECT * FROM upload_queue_logs WHERE owner_group = ? AND status = ? ORDER BY created_at, message_id",
            )
            .bind(owner_group)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn set_upload_status(
            &self,
            message_id: &str,
            status: UploadStatus,
        ) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE upload_queue_logs SET status = ? WHERE message_id = ?")
                .bind(status.as_str())
                .bind(message_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("upload {message_id}")));
            }
            Ok(())
        }

        async fn mark_uploads(
            &self,
            message_ids: &[String],
            status: UploadStatus,
        ) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            let mut changed = 0;
            for message_id in message_ids {
                let result =
                    sqlx::query("UPDATE upload_queue_logs SET status = ? WHERE message_id = ?")
                        .bind(status.as_str())
                        .bind(message_id)
                        .execute(&mut *tx)
                        .await?;
                changed += result.rows_affected();
            }
            tx.commit().await?;
            Ok(changed)
        }
    }

    #[async_trait]
    impl BalanceRepo for SqliteStore {
        async fn insert_balance_entry(&self, entry: &BalanceRow) -> MetadataResult<i64> {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO balance_logs (owner_id, amount, transaction_type, source_id, transaction_at)
                VALUES (?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(entry.owner_id)
            .bind(entry.amount)
            .bind(&entry.transaction_type)
            .bind(entry.source_id)
            .bind(entry.transaction_at)
            .fetch_one(&self.pool)
            .await?;
            Ok(id)
        }

        async fn list_balance_entries(&self, owner_id: i64) -> MetadataResult<Vec<BalanceRow>> {
            let rows = sqlx::query_as::<_, BalanceRow>(
                "SELECT * FROM balance_logs WHERE owner_id = ? ORDER BY id",
            )
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Leasable credentials. expired_to is unix seconds, last_leased_at unix microseconds.
CREATE TABLE IF NOT EXISTS configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    "group" TEXT NOT NULL DEFAULT '',
    value TEXT NOT NULL,
    expired_to INTEGER,
    status INTEGER NOT NULL DEFAULT 1,
    last_leased_at INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_configs_key_group ON configs(key, "group");
CREATE INDEX IF NOT EXISTS idx_configs_lease ON configs(key, status, last_leased_at);

-- Extraction jobs
CREATE TABLE IF NOT EXISTS user_drives (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    root_id TEXT NOT NULL,
    owner_id INTEGER NOT NULL,
    total_items INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_user_drives_owner ON user_drives(owner_id);

-- Resolved source items
CREATE TABLE IF NOT EXISTS sources (
    item_id TEXT PRIMARY KEY,
    owner_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    duration INTEGER NOT NULL DEFAULT 0,
    credential_value TEXT NOT NULL,
    expiry INTEGER,
    candidate_links TEXT NOT NULL,
    clone_count INTEGER NOT NULL DEFAULT 3,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Upload ledger
CREATE TABLE IF NOT EXISTS upload_queue_logs (
    message_id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL,
    owner_group TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'ready',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_queue_logs_group ON upload_queue_logs(owner_group, status);

-- Balance ledger (append-only)
CREATE TABLE IF NOT EXISTS balance_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    transaction_type TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    transaction_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_balance_logs_owner ON balance_logs(owner_id);
"#;
