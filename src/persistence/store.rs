//! SQLite-based job repository

use crate::core::{Job, JobFilter, JobLock, JobStatus, NewJob};
use crate::error::{Error, Result};
use crate::persistence::JobRepository;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;

const JOB_COLUMNS: &str = "id, artifact_id, component_id, status, iteration, stage, path, lock_counter, \
     creation_time, scheduling_time, execution_time, termination_time";

/// SQLite job repository
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    /// Open (or create) a database file
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
            .create_if_missing(true);

        // in-memory databases are per connection
        let max_connections = if db_path == ":memory:" { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Open the database at the given path, creating parent directories
    pub async fn at_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(&path.to_string_lossy()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                artifact_id TEXT NOT NULL,
                component_id TEXT NOT NULL,
                status TEXT NOT NULL,
                iteration INTEGER NOT NULL DEFAULT 0,
                stage INTEGER NOT NULL DEFAULT 0,
                path TEXT NOT NULL,
                lock_counter INTEGER NOT NULL DEFAULT 0,
                creation_time TEXT NOT NULL,
                scheduling_time TEXT,
                execution_time TEXT,
                termination_time TEXT
            );

            CREATE TABLE IF NOT EXISTS job_locks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                artifact_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                next_id TEXT NOT NULL,
                locked INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_artifact ON jobs(artifact_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_component_status ON jobs(component_id, status);
            CREATE INDEX IF NOT EXISTS idx_locks_job ON job_locks(job_id);
            CREATE INDEX IF NOT EXISTS idx_locks_next ON job_locks(next_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn job_from_row(row: &SqliteRow) -> Result<Job> {
        let status: String = row.try_get("status")?;
        Ok(Job {
            id: row.try_get("id")?,
            artifact_id: row.try_get("artifact_id")?,
            component_id: row.try_get("component_id")?,
            status: JobStatus::from_str(&status)
                .map_err(|e| Error::Storage(sqlx::Error::Decode(e.into())))?,
            iteration: row.try_get::<i64, _>("iteration")? as u32,
            stage: row.try_get::<i64, _>("stage")? as u32,
            path: row.try_get("path")?,
            lock_counter: row.try_get::<i64, _>("lock_counter")? as u32,
            creation_time: Self::from_naive(row.try_get("creation_time")?),
            scheduling_time: row
                .try_get::<Option<NaiveDateTime>, _>("scheduling_time")?
                .map(Self::from_naive),
            execution_time: row
                .try_get::<Option<NaiveDateTime>, _>("execution_time")?
                .map(Self::from_naive),
            termination_time: row
                .try_get::<Option<NaiveDateTime>, _>("termination_time")?
                .map(Self::from_naive),
        })
    }

    fn lock_from_row(row: &SqliteRow) -> Result<JobLock> {
        Ok(JobLock {
            id: row.try_get("id")?,
            artifact_id: row.try_get("artifact_id")?,
            job_id: row.try_get("job_id")?,
            next_id: row.try_get("next_id")?,
            locked: row.try_get("locked")?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &JobFilter) {
        builder.push(" WHERE 1 = 1");
        if let Some(artifact_id) = &filter.artifact_id {
            builder.push(" AND artifact_id = ").push_bind(artifact_id.clone());
        }
        if let Some(component_id) = &filter.component_id {
            builder.push(" AND component_id = ").push_bind(component_id.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(iteration) = filter.iteration {
            builder.push(" AND iteration = ").push_bind(iteration as i64);
        }
    }

    async fn fetch_locks(&self, column: &str, job_id: &str) -> Result<Vec<JobLock>> {
        let sql = format!(
            "SELECT id, artifact_id, job_id, next_id, locked FROM job_locks WHERE {} = ?1 ORDER BY id ASC",
            column
        );
        let rows = sqlx::query(&sql).bind(job_id).fetch_all(&self.pool).await?;
        rows.iter().map(Self::lock_from_row).collect()
    }
}

#[async_trait::async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let job = Job::from_new(job, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO jobs
            (id, artifact_id, component_id, status, iteration, stage, path, lock_counter, creation_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&job.id)
        .bind(&job.artifact_id)
        .bind(&job.component_id)
        .bind(job.status.as_str())
        .bind(job.iteration as i64)
        .bind(job.stage as i64)
        .bind(&job.path)
        .bind(job.lock_counter as i64)
        .bind(Self::to_naive(job.creation_time))
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<Job> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::job_from_row(&row),
            None => Err(Error::not_found("job", job_id)),
        }
    }

    async fn transition(
        &self,
        job_id: &str,
        component_id: &str,
        expected: JobStatus,
        next: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        // One conditional UPDATE: concurrent callers cannot both match
        let time_column = match next.stamped_time() {
            Some(crate::core::JobTime::Scheduling) => ", scheduling_time = ?4",
            Some(crate::core::JobTime::Execution) => ", execution_time = ?4",
            Some(crate::core::JobTime::Termination) => ", termination_time = ?4",
            None => "",
        };
        let sql = format!(
            "UPDATE jobs SET status = ?1{} WHERE id = ?2 AND component_id = ?3 AND status = ?5",
            time_column
        );

        let result = sqlx::query(&sql)
            .bind(next.as_str())
            .bind(job_id)
            .bind(component_id)
            .bind(Self::to_naive(now))
            .bind(expected.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            let artifact_id = match self.get_job(job_id).await {
                Ok(job) => job.artifact_id,
                Err(_) => String::new(),
            };
            return Err(Error::StateConflict {
                job_id: job_id.to_string(),
                artifact_id,
                component_id: component_id.to_string(),
                expected,
                requested: next,
            });
        }

        self.get_job(job_id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM jobs", JOB_COLUMNS));
        Self::push_filter(&mut builder, filter);
        builder.push(" ORDER BY creation_time ASC, seq ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::job_from_row).collect()
    }

    async fn count_jobs(&self, filter: &JobFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM jobs");
        Self::push_filter(&mut builder, filter);

        let row = builder.build().fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    async fn next_scheduled(&self, component_id: &str, artifact_id: Option<&str>) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE component_id = ?1 AND status = ?2 \
             AND (?3 IS NULL OR artifact_id = ?3) \
             ORDER BY creation_time ASC, seq ASC LIMIT 1",
            JOB_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(component_id)
            .bind(JobStatus::Scheduled.as_str())
            .bind(artifact_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::job_from_row).transpose()
    }

    async fn create_lock(&self, artifact_id: &str, job_id: &str, next_id: &str) -> Result<JobLock> {
        let result = sqlx::query(
            "INSERT INTO job_locks (artifact_id, job_id, next_id, locked) VALUES (?1, ?2, ?3, 1)",
        )
        .bind(artifact_id)
        .bind(job_id)
        .bind(next_id)
        .execute(&self.pool)
        .await?;

        Ok(JobLock {
            id: result.last_insert_rowid(),
            artifact_id: artifact_id.to_string(),
            job_id: job_id.to_string(),
            next_id: next_id.to_string(),
            locked: true,
        })
    }

    async fn unlock(&self, job_id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE job_locks SET locked = 0 WHERE job_id = ?1 AND locked = 1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_locks_from(&self, job_id: &str) -> Result<Vec<JobLock>> {
        self.fetch_locks("job_id", job_id).await
    }

    async fn list_locks_to(&self, job_id: &str) -> Result<Vec<JobLock>> {
        self.fetch_locks("next_id", job_id).await
    }

    async fn list_unlocked(&self, artifact_id: &str) -> Result<Vec<Job>> {
        let sql = format!(
            r#"
            SELECT {} FROM jobs
            WHERE artifact_id = ?1
              AND id NOT IN (
                SELECT DISTINCT next_id FROM job_locks
                WHERE locked = 1 AND artifact_id = ?1
              )
            ORDER BY creation_time ASC, seq ASC
            "#,
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(artifact_id).fetch_all(&self.pool).await?;
        rows.iter().map(Self::job_from_row).collect()
    }
}
