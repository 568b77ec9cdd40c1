use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notifyq::delivery::{Delivery, MessageStatus, MessageStatusKind, MessageStatusRepo};
use notifyq::jobs::{Job, JobHandler};
use sqlx::PgPool;
use tokio::time::timeout;
use tracing::{info, warn};

/// Outbound mail transport.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn send(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

/// Development relay: logs instead of sending.
pub struct LogRelay;

#[async_trait]
impl Relay for LogRelay {
    async fn send(&self, delivery: &Delivery) -> anyhow::Result<()> {
        info!(
            message_id = %delivery.message_id,
            recipient = %delivery.user.recipient(),
            subject = %delivery.options.subject,
            "delivered (log relay)"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_retries: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            max_delay: Duration::from_secs(60 * 60),
            max_retries: 10,
        }
    }
}

impl RetryPolicy {
    /// base * 2^retry_count, capped.
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let exp = retry_count.clamp(0, 31) as u32;
        self.base
            .checked_mul(1_u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

pub struct DeliveryHandler<R, M> {
    pool: PgPool,
    relay: Arc<R>,
    statuses: M,
    retry: RetryPolicy,
    send_timeout: Duration,
}

impl<R: Relay + 'static, M: MessageStatusRepo + 'static> DeliveryHandler<R, M> {
    pub fn new(pool: PgPool, relay: Arc<R>, statuses: M) -> Self {
        Self {
            pool,
            relay,
            statuses,
            retry: RetryPolicy::default(),
            send_timeout: Duration::from_secs(30),
        }
    }

    async fn record(&self, message_id: &str, kind: MessageStatusKind) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.statuses
            .upsert(&mut *conn, MessageStatus::new(message_id, kind))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<R: Relay + 'static, M: MessageStatusRepo + 'static> JobHandler for DeliveryHandler<R, M> {
    async fn perform(&self, job: &mut Job) -> anyhow::Result<()> {
        let delivery: Delivery = match job.unmarshal() {
            Ok(d) => d,
            // Undecodable payloads never succeed; let them be dequeued.
            Err(err) => anyhow::bail!("bad delivery payload in job {}: {err}", job.id),
        };

        let sent = match timeout(self.send_timeout, self.relay.send(&delivery)).await {
            Ok(res) => res,
            Err(_) => Err(anyhow::anyhow!("relay timed out after {:?}", self.send_timeout)),
        };

        match sent {
            Ok(()) => self.record(&delivery.message_id, MessageStatusKind::Delivered).await,
            Err(err) if job.retry_count < self.retry.max_retries => {
                let delay = self.retry.delay_for(job.retry_count);
                job.retry(delay);
                warn!(
                    message_id = %delivery.message_id,
                    error = %err,
                    ?delay,
                    "delivery failed, will retry"
                );
                Ok(())
            }
            Err(err) => {
                self.record(&delivery.message_id, MessageStatusKind::Failed)
                    .await?;
                Err(err.context(format!(
                    "giving up on {} after {} retries",
                    delivery.message_id, job.retry_count
                )))
            }
        }
    }
}
