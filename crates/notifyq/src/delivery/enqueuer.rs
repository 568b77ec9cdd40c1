use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::delivery::message_status::{MessageStatus, MessageStatusKind, MessageStatusRepo};
use crate::delivery::{Delivery, DeliveryContext, DeliveryOptions, Response, User};
use crate::jobs::{JobsRepo, NewJob, QueueError};

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("could not record status for {recipient}: {source}")]
    MessageStatus {
        recipient: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("could not queue delivery for {recipient}: {source}")]
    Queue {
        recipient: String,
        #[source]
        source: QueueError,
    },

    #[error("delivery payload could not be encoded: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Turns one notification request into one job per recipient.
///
/// Status rows and jobs are written in a single transaction: a status is
/// visible iff its job was durably queued.
pub struct Enqueuer<M> {
    queue: JobsRepo,
    messages: M,
}

impl<M: MessageStatusRepo> Enqueuer<M> {
    pub fn new(queue: JobsRepo, messages: M) -> Self {
        Self { queue, messages }
    }

    pub async fn enqueue(
        &self,
        conn: &PgPool,
        users: &[User],
        options: &DeliveryOptions,
        context: &DeliveryContext,
    ) -> Result<Vec<Response>, EnqueueError> {
        let mut tx = conn.begin().await?;

        let mut responses = Vec::with_capacity(users.len());
        for user in users {
            match self.enqueue_one(&mut tx, user, options, context).await {
                Ok(response) => responses.push(response),
                Err(err) => {
                    warn!(
                        vcap_request_id = %context.vcap_request_id,
                        error = %err,
                        "enqueue failed, rolling back batch"
                    );
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "rollback failed");
                    }
                    return Err(err);
                }
            }
        }

        tx.commit().await?;

        info!(
            vcap_request_id = %context.vcap_request_id,
            client_id = %context.client_id,
            recipients = responses.len(),
            "deliveries queued"
        );
        Ok(responses)
    }

    async fn enqueue_one(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user: &User,
        options: &DeliveryOptions,
        context: &DeliveryContext,
    ) -> Result<Response, EnqueueError> {
        let recipient = user.recipient();
        let message_id = Uuid::new_v4().to_string();

        let status = self
            .messages
            .upsert(
                &mut **tx,
                MessageStatus::new(message_id.clone(), MessageStatusKind::Queued),
            )
            .await
            .map_err(|source| EnqueueError::MessageStatus {
                recipient: recipient.clone(),
                source,
            })?;

        let delivery = Delivery::new(message_id, user.clone(), options.clone(), context);
        let job = NewJob::from_value(&delivery)?;

        self.queue
            .enqueue_with(&mut **tx, job)
            .await
            .map_err(|source| EnqueueError::Queue {
                recipient: recipient.clone(),
                source,
            })?;

        Ok(Response {
            notification_id: status.id,
            status: status.status,
            recipient,
            vcap_request_id: context.vcap_request_id.clone(),
        })
    }
}
