use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::jobs::error::QueueError;
use crate::jobs::halt::HaltSignal;
use crate::jobs::heartbeat::Heartbeater;
use crate::jobs::model::Job;
use crate::jobs::queue::JobQueue;
use crate::jobs::ticker::IntervalTicker;

/// Application callback run for every reserved job.
///
/// To have the job delivered again, call [`Job::retry`] before returning.
/// Otherwise the job is deleted once the callback returns, whatever the
/// outcome; an `Err` is only logged. Neither write happens if the claim was
/// reaped in the meantime.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn perform(&self, job: &mut Job) -> anyhow::Result<()>;
}

/// `"{index}-{pid}"`: stable per configured slot, distinct across restarts.
pub fn worker_id(index: u32) -> String {
    format!("{index}-{}", std::process::id())
}

pub struct Worker<Q: ?Sized, H: ?Sized> {
    id: String,
    queue: Arc<Q>,
    handler: Arc<H>,
    halt: HaltSignal,
    heartbeat: Option<Duration>,
}

impl<Q, H> Worker<Q, H>
where
    Q: JobQueue + ?Sized + 'static,
    H: JobHandler + ?Sized,
{
    pub fn new(index: u32, queue: Arc<Q>, handler: Arc<H>) -> Self {
        Self {
            id: worker_id(index),
            queue,
            handler,
            halt: HaltSignal::new(),
            heartbeat: None,
        }
    }

    /// Renew the in-flight job's lease every `interval` while the callback runs.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop after the in-flight cycle. Safe to call repeatedly or after the
    /// loop already exited.
    pub fn halt(&self) {
        self.halt.request();
    }

    pub fn halt_signal(&self) -> HaltSignal {
        self.halt.clone()
    }

    /// One cycle: wait for a job (or halt), run the callback, then dequeue it
    /// or persist its retry.
    ///
    /// Returns `Ok(false)` when halted before a job was reserved.
    pub async fn perform(&self) -> Result<bool, QueueError> {
        let job = tokio::select! {
            biased;
            _ = self.halt.requested() => return Ok(false),
            job = self.queue.reserve(&self.id) => job?,
        };

        let span = info_span!(
            "job",
            worker_id = %self.id,
            job.id = job.id,
            retry_count = job.retry_count
        );
        self.execute(job).instrument(span).await?;
        Ok(true)
    }

    async fn execute(&self, mut job: Job) -> Result<(), QueueError> {
        debug!("running job");

        let heartbeat = self.heartbeat.map(|interval| {
            Heartbeater::new(self.queue.clone(), IntervalTicker::new(interval)).spawn(job.clone())
        });

        if let Err(err) = self.handler.perform(&mut job).await {
            warn!(error = %err, retry = job.should_retry(), "job callback failed");
        }

        if let Some(heartbeat) = heartbeat {
            match heartbeat.halt().await {
                Ok(renewed) => job.version = renewed.version,
                Err(err) if err.is_stale() => {
                    warn!("claim lost while running; leaving the row to its new owner");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }

        if job.should_retry() {
            match self.queue.requeue(&mut job).await {
                Ok(()) => info!(
                    retry_count = job.retry_count,
                    active_at = %job.active_at,
                    "job scheduled for retry"
                ),
                Err(err) if err.is_stale() => {
                    warn!("claim lost before retry could be recorded; row left to its new owner");
                }
                Err(err) => return Err(err),
            }
        } else if self.queue.complete(&job).await? {
            debug!("job dequeued");
        } else {
            warn!("claim lost before completion; row left to its new owner");
        }
        Ok(())
    }

    /// Run cycles until halted. Store errors end the loop so the process can
    /// restart from a known state.
    pub async fn work(&self) -> Result<(), QueueError> {
        info!(worker_id = %self.id, "worker started");

        while !self.halt.is_requested() {
            if !self.perform().await? {
                break;
            }
        }

        info!(worker_id = %self.id, "worker halted");
        Ok(())
    }
}
