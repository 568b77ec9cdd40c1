use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::trace;

use crate::jobs::error::QueueError;
use crate::jobs::model::{Job, NewJob};

pub const DEFAULT_WAIT_MAX_DURATION: Duration = Duration::from_secs(5);

/// Longest lease the reaper honors; larger values are treated as this one.
pub const MAX_LEASE: Duration = Duration::from_secs(36_500 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Upper bound (exclusive) of the randomized sleep between empty polls.
    pub wait_max_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            wait_max_duration: DEFAULT_WAIT_MAX_DURATION,
        }
    }
}

/// Outcome of a single select + conditional-update attempt.
#[derive(Debug)]
pub enum Reservation {
    Claimed(Job),
    /// Another caller bumped the candidate's version first.
    Conflict,
    /// Nothing is currently eligible.
    Empty,
}

/// Point-in-time queue gauges for the metrics sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueGauges {
    /// All rows, claimed or not.
    pub depth: i64,
    pub retry_counts: BTreeMap<i32, i64>,
}

/// Persistence operations over the shared job table.
///
/// Mutual exclusion comes only from the store's version check: a claim is an
/// update guarded by the version the caller last saw.
#[async_trait]
pub trait JobQueue: Send + Sync {
    fn config(&self) -> &QueueConfig;

    async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError>;

    async fn try_reserve(&self, worker_id: &str) -> Result<Reservation, QueueError>;

    /// Block until a job is claimed for `worker_id`.
    ///
    /// Conflicts re-select immediately; an empty table sleeps a jittered
    /// duration before polling again. Store errors end the call.
    async fn reserve(&self, worker_id: &str) -> Result<Job, QueueError> {
        loop {
            match self.try_reserve(worker_id).await? {
                Reservation::Claimed(job) => return Ok(job),
                Reservation::Conflict => {
                    trace!(worker_id, "lost claim race, re-selecting");
                    tokio::task::yield_now().await;
                }
                Reservation::Empty => {
                    let wait = jittered_wait(self.config().wait_max_duration);
                    trace!(worker_id, ?wait, "no eligible job");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Delete by id. Returns whether a row was removed.
    async fn dequeue(&self, job: &Job) -> Result<bool, QueueError>;

    /// Delete the row only if it still carries `job.version`.
    ///
    /// `false` means the claim was lost (reaped and possibly re-claimed);
    /// the row is left to its current owner.
    async fn complete(&self, job: &Job) -> Result<bool, QueueError>;

    /// Persist `job` in place, guarded by `job.version`; refreshes the version
    /// on success.
    async fn requeue(&self, job: &mut Job) -> Result<(), QueueError>;

    /// Release claims whose lease has not been renewed within `lease`.
    /// Leases above [`MAX_LEASE`] are capped.
    async fn reap_expired(&self, lease: Duration) -> Result<u64, QueueError>;

    async fn gauges(&self) -> Result<QueueGauges, QueueError>;
}

pub(crate) fn capped_lease(lease: Duration) -> Duration {
    lease.min(MAX_LEASE)
}

/// Uniform in `[0, max)`.
pub fn jittered_wait(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    rand::thread_rng().gen_range(Duration::ZERO..max)
}
