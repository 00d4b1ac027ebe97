//! Metadata store trait and SQLite implementation.

use crate::error::MetadataResult;
use crate::repos::{FileRepo, ImportJobRepo, RecordRepo, UploadRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: UploadRepo + FileRepo + ImportJobRepo + RecordRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection: SQLite serializes writers anyway, and a single
        // connection rules out "database is locked" under axum concurrency.
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
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        tracing::debug!("metadata schema applied");
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::error::{MetadataError, is_unique_violation};
    use crate::models::*;
    use crate::repos::UpsertKind;
    use hopper_core::job::JobState;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_session_if_absent(
            &self,
            session: &UploadSessionRow,
        ) -> MetadataResult<UploadSessionRow> {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO upload_sessions (
                    session_id, file_name, file_size, total_chunks, state,
                    file_id, completing_ordinal, error_detail, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&session.session_id)
            .bind(&session.file_name)
            .bind(session.file_size)
            .bind(session.total_chunks)
            .bind(&session.state)
            .bind(session.file_id)
            .bind(session.completing_ordinal)
            .bind(&session.error_detail)
            .bind(session.created_at)
            .bind(session.updated_at)
            .execute(&mut *tx)
            .await?;

            let stored = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE session_id = ?",
            )
            .bind(&session.session_id)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(stored)
        }

        async fn get_session(&self, session_id: &str) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE session_id = ?",
            )
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn record_part(
            &self,
            session_id: &str,
            ordinal: u32,
            size_bytes: u64,
            received_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            let inserted = sqlx::query(
                r#"
                INSERT OR IGNORE INTO upload_parts (session_id, ordinal, size_bytes, received_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(session_id)
            .bind(ordinal)
            .bind(size_bytes as i64)
            .bind(received_at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                > 0;

            sqlx::query("UPDATE upload_sessions SET updated_at = ? WHERE session_id = ?")
                .bind(received_at)
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(inserted)
        }

        async fn count_parts(&self, session_id: &str) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM upload_parts WHERE session_id = ?")
                    .bind(session_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }

        async fn complete_session(
            &self,
            session_id: &str,
            file: &FileRow,
            completing_ordinal: u32,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            insert_file(&mut *tx, file).await?;
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET state = 'assembled', file_id = ?, completing_ordinal = ?, updated_at = ?
                WHERE session_id = ? AND state = 'open'
                "#,
            )
            .bind(file.file_id)
            .bind(completing_ordinal)
            .bind(updated_at)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(false);
            }
            tx.commit().await?;
            Ok(true)
        }

        async fn fail_session(
            &self,
            session_id: &str,
            error_detail: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                r#"
                UPDATE upload_sessions
                SET state = 'failed', error_detail = ?, updated_at = ?
                WHERE session_id = ? AND state = 'open'
                "#,
            )
            .bind(error_detail)
            .bind(updated_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_expired_sessions(
            &self,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                r#"
                SELECT * FROM upload_sessions
                WHERE state = 'open' AND updated_at < ?
                ORDER BY updated_at
                LIMIT ?
                "#,
            )
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_session(&self, session_id: &str) -> MetadataResult<()> {
            // upload_parts rows go with it via ON DELETE CASCADE
            sqlx::query("DELETE FROM upload_sessions WHERE session_id = ?")
                .bind(session_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn count_open_sessions(&self) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM upload_sessions WHERE state = 'open'")
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn create_file(&self, file: &FileRow) -> MetadataResult<()> {
            let mut conn = self.pool.acquire().await?;
            insert_file(&mut *conn, file).await
        }

        async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_id = ?")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }
    }

    async fn insert_file(conn: &mut sqlx::SqliteConnection, file: &FileRow) -> MetadataResult<()> {
        match sqlx::query(
            r#"
            INSERT INTO files (file_id, file_name, size_bytes, sha256, object_key, session_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.file_id)
        .bind(&file.file_name)
        .bind(file.size_bytes)
        .bind(&file.sha256)
        .bind(&file.object_key)
        .bind(&file.session_id)
        .bind(file.created_at)
        .execute(&mut *conn)
        .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e, "files") => Err(MetadataError::Constraint(format!(
                "file {} already recorded",
                file.file_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Counter columns written by both progress flushes and completion.
    async fn write_progress(
        conn: &mut sqlx::SqliteConnection,
        job_id: Uuid,
        update: &JobProgressUpdate,
    ) -> MetadataResult<()> {
        let stats = &update.stats;
        sqlx::query(
            r#"
            UPDATE import_jobs
            SET total = ?, processed = ?, created = ?, updated = ?, errors = ?
            WHERE job_id = ?
            "#,
        )
        .bind(stats.total as i64)
        .bind(stats.processed as i64)
        .bind(stats.created as i64)
        .bind(stats.updated as i64)
        .bind(stats.errors as i64)
        .bind(job_id)
        .execute(&mut *conn)
        .await?;

        for error in &update.new_errors {
            sqlx::query(
                "INSERT INTO import_job_errors (job_id, row_number, identifier, message) VALUES (?, ?, ?, ?)",
            )
            .bind(job_id)
            .bind(error.row_number)
            .bind(&error.identifier)
            .bind(&error.message)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn current_state(
        conn: &mut sqlx::SqliteConnection,
        job_id: Uuid,
    ) -> MetadataResult<Option<JobState>> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM import_jobs WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&mut *conn)
                .await?;
        state
            .map(|s| {
                JobState::parse(&s).map_err(|e| MetadataError::Internal(e.to_string()))
            })
            .transpose()
    }

    #[async_trait]
    impl ImportJobRepo for SqliteStore {
        async fn create_job(&self, job: &ImportJobRow) -> MetadataResult<()> {
            match sqlx::query(
                r#"
                INSERT INTO import_jobs (
                    job_id, file_id, state, total, processed, created, updated, errors,
                    message, created_at, started_at, finished_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(job.job_id)
            .bind(job.file_id)
            .bind(&job.state)
            .bind(job.total)
            .bind(job.processed)
            .bind(job.created)
            .bind(job.updated)
            .bind(job.errors)
            .bind(&job.message)
            .bind(job.created_at)
            .bind(job.started_at)
            .bind(job.finished_at)
            .execute(&self.pool)
            .await
            {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e, "import_jobs") => Err(MetadataError::Constraint(
                    "an import job is already active for this file".to_string(),
                )),
                Err(e) => Err(e.into()),
            }
        }

        async fn get_job(&self, job_id: Uuid) -> MetadataResult<Option<ImportJobRow>> {
            let row = sqlx::query_as::<_, ImportJobRow>("SELECT * FROM import_jobs WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_active_job_for_file(
            &self,
            file_id: Uuid,
        ) -> MetadataResult<Option<ImportJobRow>> {
            let row = sqlx::query_as::<_, ImportJobRow>(
                "SELECT * FROM import_jobs WHERE file_id = ? AND state IN ('queued', 'processing')",
            )
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_job_snapshot(
            &self,
            job_id: Uuid,
            error_limit: u32,
        ) -> MetadataResult<Option<JobSnapshotRow>> {
            let mut tx = self.pool.begin().await?;
            let Some(job) =
                sqlx::query_as::<_, ImportJobRow>("SELECT * FROM import_jobs WHERE job_id = ?")
                    .bind(job_id)
                    .fetch_optional(&mut *tx)
                    .await?
            else {
                tx.commit().await?;
                return Ok(None);
            };

            let errors = sqlx::query_as::<_, JobErrorRow>(
                r#"
                SELECT job_id, row_number, identifier, message FROM import_job_errors
                WHERE job_id = ?
                ORDER BY error_seq
                LIMIT ?
                "#,
            )
            .bind(job_id)
            .bind(error_limit)
            .fetch_all(&mut *tx)
            .await?;
            tx.commit().await?;

            Ok(Some(JobSnapshotRow { job, errors }))
        }

        async fn claim_job(&self, job_id: Uuid, started_at: OffsetDateTime) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE import_jobs SET state = 'processing', started_at = ? WHERE job_id = ? AND state = 'queued'",
            )
            .bind(started_at)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn flush_progress(
            &self,
            job_id: Uuid,
            update: &JobProgressUpdate,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            if current_state(&mut *tx, job_id).await? != Some(JobState::Processing) {
                tx.rollback().await?;
                return Ok(false);
            }
            write_progress(&mut *tx, job_id, update).await?;
            tx.commit().await?;
            Ok(true)
        }

        async fn finish_job(&self, job_id: Uuid, completion: &JobCompletion) -> MetadataResult<bool> {
            if !completion.state.is_terminal() {
                return Err(MetadataError::InvalidStateTransition {
                    from: "processing".to_string(),
                    to: completion.state.as_str().to_string(),
                });
            }

            let mut tx = self.pool.begin().await?;
            match current_state(&mut *tx, job_id).await? {
                Some(state) if !state.is_terminal() => {}
                _ => {
                    tx.rollback().await?;
                    return Ok(false);
                }
            }
            write_progress(&mut *tx, job_id, &completion.progress).await?;
            sqlx::query(
                "UPDATE import_jobs SET state = ?, message = ?, finished_at = ? WHERE job_id = ?",
            )
            .bind(completion.state.as_str())
            .bind(&completion.message)
            .bind(completion.finished_at)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(true)
        }

        async fn fail_job(
            &self,
            job_id: Uuid,
            message: &str,
            finished_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE import_jobs SET state = 'failed', message = ?, finished_at = ?
                WHERE job_id = ? AND state IN ('queued', 'processing')
                "#,
            )
            .bind(message)
            .bind(finished_at)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_orphaned_jobs(&self) -> MetadataResult<Vec<ImportJobRow>> {
            let rows = sqlx::query_as::<_, ImportJobRow>(
                "SELECT * FROM import_jobs WHERE state IN ('queued', 'processing') ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl RecordRepo for SqliteStore {
        async fn upsert_record(
            &self,
            identifier: &str,
            data_json: &str,
            job_id: Option<Uuid>,
            at: OffsetDateTime,
        ) -> MetadataResult<UpsertKind> {
            let mut tx = self.pool.begin().await?;
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM import_records WHERE identifier = ?)",
            )
            .bind(identifier)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO import_records (identifier, data_json, job_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(identifier) DO UPDATE SET
                    data_json = excluded.data_json,
                    job_id = excluded.job_id,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(identifier)
            .bind(data_json)
            .bind(job_id)
            .bind(at)
            .bind(at)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            Ok(if exists {
                UpsertKind::Updated
            } else {
                UpsertKind::Created
            })
        }

        async fn get_record(&self, identifier: &str) -> MetadataResult<Option<RecordRow>> {
            let row =
                sqlx::query_as::<_, RecordRow>("SELECT * FROM import_records WHERE identifier = ?")
                    .bind(identifier)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn count_records(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_records")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Chunked upload sessions
CREATE TABLE IF NOT EXISTS upload_sessions (
    session_id TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'open',
    file_id BLOB,
    completing_ordinal INTEGER,
    error_detail TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_state ON upload_sessions(state, updated_at);

-- Ordinals durably stored per session
CREATE TABLE IF NOT EXISTS upload_parts (
    session_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL,
    received_at TEXT NOT NULL,
    PRIMARY KEY (session_id, ordinal),
    FOREIGN KEY (session_id) REFERENCES upload_sessions(session_id) ON DELETE CASCADE
);

-- Assembled files
CREATE TABLE IF NOT EXISTS files (
    file_id BLOB PRIMARY KEY,
    file_name TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    sha256 TEXT NOT NULL,
    object_key TEXT NOT NULL,
    session_id TEXT,
    created_at TEXT NOT NULL
);

-- Import jobs
CREATE TABLE IF NOT EXISTS import_jobs (
    job_id BLOB PRIMARY KEY,
    file_id BLOB NOT NULL REFERENCES files(file_id),
    state TEXT NOT NULL DEFAULT 'queued',
    total INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    created INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_import_jobs_state ON import_jobs(state);
-- At most one active job per file
CREATE UNIQUE INDEX IF NOT EXISTS idx_import_jobs_file_active
ON import_jobs(file_id)
WHERE state IN ('queued', 'processing');

-- Row errors, append-only, in recording order
CREATE TABLE IF NOT EXISTS import_job_errors (
    error_seq INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id BLOB NOT NULL REFERENCES import_jobs(job_id) ON DELETE CASCADE,
    row_number INTEGER NOT NULL,
    identifier TEXT NOT NULL,
    message TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_import_job_errors_job ON import_job_errors(job_id, error_seq);

-- Records written by imports
CREATE TABLE IF NOT EXISTS import_records (
    identifier TEXT PRIMARY KEY,
    data_json TEXT NOT NULL,
    job_id BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
