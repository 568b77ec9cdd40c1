use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatusKind {
    Queued,
    Delivered,
    Failed,
    Undeliverable,
}

impl MessageStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatusKind::Queued => "queued",
            MessageStatusKind::Delivered => "delivered",
            MessageStatusKind::Failed => "failed",
            MessageStatusKind::Undeliverable => "undeliverable",
        }
    }
}

/// User-visible delivery status, keyed by message id.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MessageStatus {
    pub id: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl MessageStatus {
    pub fn new(id: impl Into<String>, kind: MessageStatusKind) -> Self {
        Self {
            id: id.into(),
            status: kind.as_str().to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// Message-status persistence. Takes the connection explicitly so the write
/// can share a caller's transaction.
#[async_trait]
pub trait MessageStatusRepo: Send + Sync {
    async fn upsert(
        &self,
        conn: &mut PgConnection,
        status: MessageStatus,
    ) -> Result<MessageStatus, sqlx::Error>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PgMessageStatusRepo;

impl PgMessageStatusRepo {
    pub async fn find(
        &self,
        conn: &mut PgConnection,
        id: &str,
    ) -> Result<Option<MessageStatus>, sqlx::Error> {
        sqlx::query_as::<_, MessageStatus>(
            "SELECT id, status, updated_at FROM message_statuses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }
}

#[async_trait]
impl MessageStatusRepo for PgMessageStatusRepo {
    async fn upsert(
        &self,
        conn: &mut PgConnection,
        status: MessageStatus,
    ) -> Result<MessageStatus, sqlx::Error> {
        sqlx::query_as::<_, MessageStatus>(
            r#"
            INSERT INTO message_statuses (id, status, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id)
            DO UPDATE SET status = EXCLUDED.status,
                          updated_at = EXCLUDED.updated_at
            RETURNING id, status, updated_at
            "#,
        )
        .bind(&status.id)
        .bind(&status.status)
        .bind(status.updated_at)
        .fetch_one(conn)
        .await
    }
}
