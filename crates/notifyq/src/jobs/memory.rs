use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::jobs::error::QueueError;
use crate::jobs::model::{Job, NewJob};
use crate::jobs::queue::{capped_lease, JobQueue, QueueConfig, QueueGauges, Reservation};

/// In-process queue with the same optimistic-version rules as [`JobsRepo`].
///
/// Selection and claim take the lock separately, like the two statements the
/// Postgres queue issues, so claim races surface as [`Reservation::Conflict`].
///
/// [`JobsRepo`]: crate::jobs::JobsRepo
#[derive(Default)]
pub struct MemoryQueue {
    config: QueueConfig,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    last_id: i64,
    rows: BTreeMap<i64, Job>,
}

impl MemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: i64) -> Option<Job> {
        self.state().rows.get(&id).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state().rows.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().rows.is_empty()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError> {
        let mut state = self.state();
        state.last_id += 1;
        let job = Job::from_new(state.last_id, job);
        state.rows.insert(job.id, job.clone());
        Ok(job)
    }

    async fn try_reserve(&self, worker_id: &str) -> Result<Reservation, QueueError> {
        let candidate = {
            let now = Utc::now();
            self.state()
                .rows
                .values()
                .find(|j| !j.is_claimed() && j.active_at <= now)
                .cloned()
        };

        let Some(candidate) = candidate else {
            return Ok(Reservation::Empty);
        };

        let mut state = self.state();
        match state.rows.get_mut(&candidate.id) {
            Some(row) if row.version == candidate.version => {
                row.worker_id = worker_id.to_string();
                row.active_at = Utc::now();
                row.version += 1;
                Ok(Reservation::Claimed(row.clone()))
            }
            _ => Ok(Reservation::Conflict),
        }
    }

    async fn dequeue(&self, job: &Job) -> Result<bool, QueueError> {
        Ok(self.state().rows.remove(&job.id).is_some())
    }

    async fn complete(&self, job: &Job) -> Result<bool, QueueError> {
        let mut state = self.state();
        match state.rows.get(&job.id) {
            Some(row) if row.version == job.version => {
                state.rows.remove(&job.id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue(&self, job: &mut Job) -> Result<(), QueueError> {
        let mut state = self.state();
        let row = state
            .rows
            .get_mut(&job.id)
            .filter(|row| row.version == job.version)
            .ok_or(QueueError::StaleVersion {
                id: job.id,
                version: job.version,
            })?;

        row.worker_id = job.worker_id.clone();
        row.payload = job.payload.clone();
        row.retry_count = job.retry_count;
        row.active_at = job.active_at;
        row.version += 1;
        job.version = row.version;
        Ok(())
    }

    async fn reap_expired(&self, lease: Duration) -> Result<u64, QueueError> {
        let lease = chrono::Duration::milliseconds(capped_lease(lease).as_millis() as i64);
        let cutoff = Utc::now() - lease;

        let mut reaped = 0;
        for row in self.state().rows.values_mut() {
            if row.is_claimed() && row.active_at < cutoff {
                row.worker_id.clear();
                row.version += 1;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn gauges(&self) -> Result<QueueGauges, QueueError> {
        let state = self.state();
        let mut gauges = QueueGauges {
            depth: state.rows.len() as i64,
            ..QueueGauges::default()
        };
        for row in state.rows.values() {
            *gauges.retry_counts.entry(row.retry_count).or_default() += 1;
        }
        Ok(gauges)
    }
}
