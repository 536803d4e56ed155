//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{BalanceRepo, CredentialRepo, JobRepo, SourceRepo, UploadLedgerRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use ferry_core::config::PgSslMode;
use ferry_core::{CredentialStatus, ExtractionStatus, UploadStatus};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

const CREDENTIAL_COLUMNS: &str = r#"id, key, "group", value, expired_to, status, last_leased_at"#;

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements cannot hold more than one command.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
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
        "postgres"
    }
}

#[async_trait]
impl CredentialRepo for PostgresStore {
    async fn insert_credential(&self, credential: &NewCredential) -> MetadataResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO configs (key, "group", value, expired_to, status, last_leased_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
        // SKIP LOCKED lets a concurrent lease move on to the next candidate
        // instead of waiting for, and then re-stamping, the same row.
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            r#"
            UPDATE configs SET last_leased_at = $1
            WHERE id = (
                SELECT id FROM configs
                WHERE key = $2 AND status = $3 AND (expired_to IS NULL OR expired_to < $4)
                ORDER BY last_leased_at ASC NULLS FIRST, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
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
        let result =
            sqlx::query(r#"UPDATE configs SET status = $1 WHERE key = $2 AND "group" = $3"#)
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
            sqlx::query(r#"UPDATE configs SET expired_to = $1 WHERE key = $2 AND "group" = $3"#)
                .bind(until.unix_timestamp())
                .bind(key)
                .bind(group)
                .execute(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn get_credentials(&self, key: &str, group: &str) -> MetadataResult<Vec<CredentialRow>> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            r#"SELECT {CREDENTIAL_COLUMNS} FROM configs WHERE key = $1 AND "group" = $2 ORDER BY id"#
        ))
        .bind(key)
        .bind(group)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl JobRepo for PostgresStore {
    async fn create_extraction_job(&self, root_id: &str, owner_id: i64) -> MetadataResult<i64> {
        let now = OffsetDateTime::now_utc();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO user_drives (root_id, owner_id, total_items, status, created_at, updated_at)
            VALUES ($1, $2, 0, $3, $4, $4)
            RETURNING id
            "#,
        )
        .bind(root_id)
        .bind(owner_id)
        .bind(ExtractionStatus::Pending.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_extraction_job(&self, job_id: i64) -> MetadataResult<Option<ExtractionJobRow>> {
        let row = sqlx::query_as::<_, ExtractionJobRow>(
            "SELECT id, root_id, owner_id, total_items, status, created_at, updated_at FROM user_drives WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_job_status(&self, job_id: i64, status: ExtractionStatus) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE user_drives SET status = $1, updated_at = $2 WHERE id = $3")
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
            "UPDATE user_drives SET status = $1, total_items = $2, updated_at = $3 WHERE id = $4",
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
impl SourceRepo for PostgresStore {
    async fn upsert_source(&self, source: &SourceRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (item_id, owner_id, title, duration, credential_value, expiry,
                                 candidate_links, clone_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (item_id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                title = EXCLUDED.title,
                duration = EXCLUDED.duration,
                credential_value = EXCLUDED.credential_value,
                expiry = EXCLUDED.expiry,
                candidate_links = EXCLUDED.candidate_links,
                clone_count = EXCLUDED.clone_count,
                updated_at = EXCLUDED.updated_at
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
        let row = sqlx::query_as::<_, SourceRow>("SELECT * FROM sources WHERE item_id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl UploadLedgerRepo for PostgresStore {
    async fn record_upload(&self, entry: &UploadLogRow) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO upload_queue_logs (message_id, item_id, owner_group, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (message_id) DO NOTHING
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
        let row =
            sqlx::query_as::<_, UploadLogRow>("SELECT * FROM upload_queue_logs WHERE message_id = $1")
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
            "SELECT * FROM upload_queue_logs WHERE owner_group = $1 AND status = $2 ORDER BY created_at, message_id",
        )
        .bind(owner_group)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_upload_status(&self, message_id: &str, status: UploadStatus) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE upload_queue_logs SET status = $1 WHERE message_id = $2")
            .bind(status.as_str())
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("upload {message_id}")));
        }
        Ok(())
    }

    async fn mark_uploads(&self, message_ids: &[String], status: UploadStatus) -> MetadataResult<u64> {
        let mut tx = self.pool.begin().await?;
        let result =
            sqlx::query("UPDATE upload_queue_logs SET status = $1 WHERE message_id = ANY($2)")
                .bind(status.as_str())
                .bind(message_ids)
                .execute(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BalanceRepo for PostgresStore {
    async fn insert_balance_entry(&self, entry: &BalanceRow) -> MetadataResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO balance_logs (owner_id, amount, transaction_type, source_id, transaction_at)
            VALUES ($1, $2, $3, $4, $5)
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
        let rows =
            sqlx::query_as::<_, BalanceRow>("SELECT * FROM balance_logs WHERE owner_id = $1 ORDER BY id")
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::postgres_schema_statements;

    #[test]
    fn postgres_schema_statements_skips_empty_and_comment_only() {
        let schema = r#"
            -- comment only

            CREATE TABLE foo (id int);
            ;
            -- another comment
            CREATE TABLE bar (id int);
        "#;

        let statements = postgres_schema_statements(schema);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("CREATE TABLE foo"));
        assert!(statements[1].contains("CREATE TABLE bar"));
    }

    #[test]
    fn embedded_schema_creates_every_table() {
        let statements = postgres_schema_statements(super::POSTGRES_SCHEMA);
        for table in [
            "configs",
            "user_drives",
            "sources",
            "upload_queue_logs",
            "balance_logs",
        ] {
            assert!(
                statements
                    .iter()
                    .any(|s| s.contains(&format!("CREATE TABLE IF NOT EXISTS {table}"))),
                "missing table {table}"
            );
        }
    }
}
