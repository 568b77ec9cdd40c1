use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::jobs::error::QueueError;
use crate::jobs::halt::HaltSignal;
use crate::jobs::model::Job;
use crate::jobs::queue::JobQueue;
use crate::jobs::ticker::Ticker;

/// Keeps a claimed job's lease fresh by writing the tick time into
/// `active_at` on every tick.
pub struct Heartbeater<Q: ?Sized, T> {
    queue: Arc<Q>,
    ticker: T,
    halt: HaltSignal,
}

impl<Q, T> Heartbeater<Q, T>
where
    Q: JobQueue + ?Sized + 'static,
    T: Ticker + 'static,
{
    pub fn new(queue: Arc<Q>, ticker: T) -> Self {
        Self {
            queue,
            ticker,
            halt: HaltSignal::new(),
        }
    }

    pub fn halt_signal(&self) -> HaltSignal {
        self.halt.clone()
    }

    /// Renew the lease until halted. Returns the job as last persisted.
    ///
    /// A stale version means the claim was taken away (e.g. reaped); beating
    /// stops with that error.
    pub async fn beat(&mut self, mut job: Job) -> Result<Job, QueueError> {
        let id = job.id;
        self.ticker.start();

        let result = loop {
            tokio::select! {
                biased;
                _ = self.halt.requested() => break Ok(job),
                at = self.ticker.tick() => {
                    job.active_at = at;
                    if let Err(err) = self.queue.requeue(&mut job).await {
                        break Err(err);
                    }
                    trace!(job.id = job.id, version = job.version, "lease renewed");
                }
            }
        };

        self.ticker.stop();
        if let Err(err) = &result {
            warn!(job.id = id, error = %err, "heartbeat stopped");
        } else {
            debug!(job.id = id, "heartbeat halted");
        }
        result
    }

    pub fn spawn(mut self, job: Job) -> HeartbeatHandle {
        let halt = self.halt.clone();
        let task = tokio::spawn(async move { self.beat(job).await });
        HeartbeatHandle { halt, task }
    }
}

pub struct HeartbeatHandle {
    halt: HaltSignal,
    task: JoinHandle<Result<Job, QueueError>>,
}

impl HeartbeatHandle {
    /// Signal the heartbeat and wait until it has stopped.
    pub async fn halt(self) -> Result<Job, QueueError> {
        self.halt.request();
        self.task.await?
    }
}
