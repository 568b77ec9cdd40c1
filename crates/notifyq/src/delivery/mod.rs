pub mod enqueuer;
pub mod message_status;

pub use enqueuer::{EnqueueError, Enqueuer};
pub use message_status::{MessageStatus, MessageStatusKind, MessageStatusRepo, PgMessageStatusRepo};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resolved recipient. At least one of the two identifiers is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub guid: Option<String>,
    pub email: Option<String>,
}

impl User {
    pub fn with_guid(guid: impl Into<String>) -> Self {
        Self {
            guid: Some(guid.into()),
            email: None,
        }
    }

    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            guid: None,
            email: Some(email.into()),
        }
    }

    /// GUID when known, otherwise the email address.
    pub fn recipient(&self) -> String {
        self.guid
            .as_deref()
            .filter(|g| !g.is_empty())
            .or(self.email.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

/// Rendered message and routing hints, opaque to the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOptions {
    pub kind_id: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub reply_to: String,
    pub endpoint: String,
    pub template_id: String,
    pub role: String,
}

/// Request-scoped context copied into every job of one enqueue call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryContext {
    pub space: String,
    pub organization: String,
    pub client_id: String,
    pub uaa_host: String,
    pub scope: String,
    pub vcap_request_id: String,
    pub request_received: DateTime<Utc>,
}

/// Job payload for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub message_id: String,
    pub user: User,
    pub options: DeliveryOptions,
    pub space: String,
    pub organization: String,
    pub client_id: String,
    pub uaa_host: String,
    pub scope: String,
    pub vcap_request_id: String,
    pub request_received: DateTime<Utc>,
}

impl Delivery {
    pub fn new(
        message_id: String,
        user: User,
        options: DeliveryOptions,
        context: &DeliveryContext,
    ) -> Self {
        Self {
            message_id,
            user,
            options,
            space: context.space.clone(),
            organization: context.organization.clone(),
            client_id: context.client_id.clone(),
            uaa_host: context.uaa_host.clone(),
            scope: context.scope.clone(),
            vcap_request_id: context.vcap_request_id.clone(),
            request_received: context.request_received,
        }
    }
}

/// What the caller reports back per recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub notification_id: String,
    pub status: String,
    pub recipient: String,
    pub vcap_request_id: String,
}
