use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};

const MAX_RETRY_DELAY_DAYS: i64 = 36_500;

/// A persisted unit of delivery work.
///
/// A row exists from enqueue until dequeue deletes it; there is no "done"
/// status. `worker_id` is empty while nobody holds the claim.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub worker_id: String,
    pub payload: String,
    /// Bumped by the store on every successful update.
    pub version: i64,
    pub retry_count: i32,
    pub active_at: DateTime<Utc>,
    should_retry: bool,
}

impl Job {
    /// Decode the opaque payload into the caller's delivery type.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Re-arm the job for another attempt after `delay`.
    ///
    /// Only mutates this copy; the worker persists it with a requeue once the
    /// callback returns.
    pub fn retry(&mut self, delay: Duration) {
        let cap = chrono::Duration::days(MAX_RETRY_DELAY_DAYS);
        let delay = chrono::Duration::from_std(delay).unwrap_or(cap).min(cap);

        self.worker_id.clear();
        self.retry_count = self.retry_count.saturating_add(1);
        self.active_at = Utc::now() + delay;
        self.should_retry = true;
    }

    pub fn should_retry(&self) -> bool {
        self.should_retry
    }

    /// `(retry_count, active_at)`
    pub fn state(&self) -> (i32, DateTime<Utc>) {
        (self.retry_count, self.active_at)
    }

    pub fn is_claimed(&self) -> bool {
        !self.worker_id.is_empty()
    }

    pub(crate) fn from_new(id: i64, job: NewJob) -> Self {
        Self {
            id,
            worker_id: String::new(),
            payload: job.payload,
            version: 1,
            retry_count: 0,
            active_at: job.active_at,
            should_retry: false,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for Job {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            worker_id: row.try_get("worker_id")?,
            payload: row.try_get("payload")?,
            version: row.try_get("version")?,
            retry_count: row.try_get("retry_count")?,
            active_at: row.try_get("active_at")?,
            should_retry: false,
        })
    }
}

/// A job that has not been inserted yet.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub payload: String,
    /// Earliest time the job may be reserved.
    pub active_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            active_at: Utc::now(),
        }
    }

    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_string(value)?))
    }

    pub fn at(mut self, active_at: DateTime<Utc>) -> Self {
        self.active_at = active_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payload {
        user: String,
        attempt: u32,
    }

    fn claimed_job() -> Job {
        let mut job = Job::from_new(7, NewJob::new(r#"{"user":"u-1","attempt":2}"#));
        job.worker_id = "1-4242".to_string();
        job
    }

    #[test]
    fn retry_clears_claim_and_pushes_active_at_forward() {
        let mut job = claimed_job();
        let before = Utc::now();

        job.retry(Duration::from_secs(600));

        assert_eq!(job.worker_id, "");
        assert!(!job.is_claimed());
        assert_eq!(job.retry_count, 1);
        assert!(job.active_at >= before + chrono::Duration::minutes(10));
        assert!(job.should_retry());
    }

    #[test]
    fn retry_count_keeps_increasing() {
        let mut job = claimed_job();
        job.retry(Duration::ZERO);
        job.retry(Duration::ZERO);
        job.retry(Duration::ZERO);

        let (retries, _) = job.state();
        assert_eq!(retries, 3);
    }

    #[test]
    fn huge_delay_saturates_instead_of_panicking() {
        let mut job = claimed_job();
        job.retry(Duration::MAX);
        assert!(job.active_at > Utc::now());
    }

    #[test]
    fn unmarshal_decodes_payload() {
        let job = claimed_job();
        let payload: Payload = job.unmarshal().unwrap();
        assert_eq!(
            payload,
            Payload {
                user: "u-1".to_string(),
                attempt: 2
            }
        );
    }

    #[test]
    fn fresh_job_is_unclaimed_with_version_one() {
        let job = Job::from_new(1, NewJob::new("{}"));
        assert!(!job.is_claimed());
        assert_eq!(job.version, 1);
        assert!(!job.should_retry());
    }
}
