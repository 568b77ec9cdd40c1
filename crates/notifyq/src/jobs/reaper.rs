use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::jobs::error::QueueError;
use crate::jobs::halt::HaltSignal;
use crate::jobs::queue::JobQueue;
use crate::jobs::ticker::Ticker;

/// Periodically hands abandoned claims back to the pool.
///
/// A claim is abandoned once its `active_at` is older than `lease`, i.e. the
/// holder stopped heartbeating (crashed, or runs without a heartbeat for
/// longer than the lease).
pub struct Reaper<Q: ?Sized, T> {
    queue: Arc<Q>,
    ticker: T,
    lease: Duration,
    halt: HaltSignal,
}

impl<Q, T> Reaper<Q, T>
where
    Q: JobQueue + ?Sized,
    T: Ticker,
{
    pub fn new(queue: Arc<Q>, ticker: T, lease: Duration) -> Self {
        Self {
            queue,
            ticker,
            lease,
            halt: HaltSignal::new(),
        }
    }

    pub fn halt_signal(&self) -> HaltSignal {
        self.halt.clone()
    }

    pub async fn run(&mut self) -> Result<(), QueueError> {
        self.ticker.start();

        let result = loop {
            tokio::select! {
                biased;
                _ = self.halt.requested() => break Ok(()),
                _ = self.ticker.tick() => {
                    match self.queue.reap_expired(self.lease).await {
                        Ok(0) => {}
                        Ok(n) => info!(reaped = n, lease = ?self.lease, "released expired claims"),
                        Err(err) => break Err(err),
                    }
                }
            }
        };

        self.ticker.stop();
        debug!("reaper stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::memory::MemoryQueue;
    use crate::jobs::model::NewJob;
    use crate::jobs::ticker::ManualTicker;
    use chrono::Utc;

    #[tokio::test]
    async fn tick_releases_stale_claim() {
        let queue = Arc::new(MemoryQueue::default());
        queue.enqueue(NewJob::new("{}")).await.unwrap();
        let mut job = queue.reserve("dead-worker").await.unwrap();
        job.active_at = Utc::now() - chrono::Duration::minutes(10);
        queue.requeue(&mut job).await.unwrap();

        let (ticks, ticker) = ManualTicker::new();
        let mut reaper = Reaper::new(queue.clone(), ticker, Duration::from_secs(60));
        let halt = reaper.halt_signal();
        let running = tokio::spawn(async move { reaper.run().await });

        ticks.tick_at(Utc::now());
        for _ in 0..100 {
            if !queue.get(job.id).unwrap().is_claimed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        halt.request();
        running.await.unwrap().unwrap();

        let row = queue.get(job.id).unwrap();
        assert_eq!(row.worker_id, "");
        assert!(!ticks.is_running());

        let again = queue.reserve("live-worker").await.unwrap();
        assert_eq!(again.id, job.id);
    }
}
