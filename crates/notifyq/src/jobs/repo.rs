// crates/notifyq/src/jobs/repo.rs

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool};

use crate::jobs::error::QueueError;
use crate::jobs::model::{Job, NewJob};
use crate::jobs::queue::{capped_lease, JobQueue, QueueConfig, QueueGauges, Reservation};

/// Postgres-backed queue over the `jobs` table.
#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
    config: QueueConfig,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, QueueConfig::default())
    }

    pub fn with_config(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ----------------------------
    // Executor-bound operations
    // ----------------------------

    /// Insert on any executor, so callers can bind the insert to their own
    /// transaction. The job is not reservable before that transaction commits.
    pub async fn enqueue_with<'c, E>(&self, executor: E, job: NewJob) -> Result<Job, QueueError>
    where
        E: PgExecutor<'c>,
    {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (worker_id, payload, version, retry_count, active_at)
            VALUES ('', $1, 1, 0, $2)
            RETURNING *
            "#,
        )
        .bind(&job.payload)
        .bind(job.active_at)
        .fetch_one(executor)
        .await?;

        Ok(job)
    }

    pub async fn requeue_with<'c, E>(&self, executor: E, job: &mut Job) -> Result<(), QueueError>
    where
        E: PgExecutor<'c>,
    {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET worker_id = $1,
                payload = $2,
                retry_count = $3,
                active_at = $4,
                version = version + 1
            WHERE id = $5
              AND version = $6
            RETURNING version
            "#,
        )
        .bind(&job.worker_id)
        .bind(&job.payload)
        .bind(job.retry_count)
        .bind(job.active_at)
        .bind(job.id)
        .bind(job.version)
        .fetch_optional(executor)
        .await?;

        match version {
            Some(v) => {
                job.version = v;
                Ok(())
            }
            None => Err(QueueError::StaleVersion {
                id: job.id,
                version: job.version,
            }),
        }
    }

    pub async fn dequeue_with<'c, E>(&self, executor: E, job: &Job) -> Result<bool, QueueError>
    where
        E: PgExecutor<'c>,
    {
        let res = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job.id)
            .execute(executor)
            .await?;

        Ok(res.rows_affected() > 0)
    }

    /// Version-guarded delete: zero rows means the claim was lost.
    pub async fn complete_with<'c, E>(&self, executor: E, job: &Job) -> Result<bool, QueueError>
    where
        E: PgExecutor<'c>,
    {
        let res = sqlx::query("DELETE FROM jobs WHERE id = $1 AND version = $2")
            .bind(job.id)
            .bind(job.version)
            .execute(executor)
            .await?;

        Ok(res.rows_affected() > 0)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>, QueueError> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn len(&self) -> Result<i64, QueueError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn retry_queue_lengths(&self) -> Result<BTreeMap<i32, i64>, QueueError> {
        let rows = sqlx::query_as::<_, (i32, i64)>(
            r#"
            SELECT retry_count, COUNT(*)
            FROM jobs
            GROUP BY retry_count
            ORDER BY retry_count
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl JobQueue for JobsRepo {
    fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError> {
        self.enqueue_with(&self.pool, job).await
    }

    /// Select one eligible row, then claim it with an update guarded by the
    /// version we read. Zero rows updated means someone else won.
    async fn try_reserve(&self, worker_id: &str) -> Result<Reservation, QueueError> {
        let candidate = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            WHERE worker_id = ''
              AND active_at <= now()
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(candidate) = candidate else {
            return Ok(Reservation::Empty);
        };

        let claimed = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET worker_id = $1,
                active_at = now(),
                version = version + 1
            WHERE id = $2
              AND version = $3
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(candidate.id)
        .bind(candidate.version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match claimed {
            Some(job) => Reservation::Claimed(job),
            None => Reservation::Conflict,
        })
    }

    async fn dequeue(&self, job: &Job) -> Result<bool, QueueError> {
        self.dequeue_with(&self.pool, job).await
    }

    async fn complete(&self, job: &Job) -> Result<bool, QueueError> {
        self.complete_with(&self.pool, job).await
    }

    async fn requeue(&self, job: &mut Job) -> Result<(), QueueError> {
        self.requeue_with(&self.pool, job).await
    }

    async fn reap_expired(&self, lease: Duration) -> Result<u64, QueueError> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET worker_id = '',
                version = version + 1
            WHERE worker_id <> ''
              AND active_at < now() - ($1::float8 * interval '1 second')
            "#,
        )
        .bind(capped_lease(lease).as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    async fn gauges(&self) -> Result<QueueGauges, QueueError> {
        Ok(QueueGauges {
            depth: self.len().await?,
            retry_counts: self.retry_queue_lengths().await?,
        })
    }
}
