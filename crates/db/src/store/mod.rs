//! Persistence boundary of the dispatcher.
//!
//! Every transition that two dispatch invocations could race on is a
//! compare-and-set keyed by a claim token: whoever claims a delivery owns it
//! until it records a result, and a stale owner's late write is rejected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_core::types::{
    AttemptResult, DueDelivery, NewDelivery, StaleClaim, WebhookDelivery, WebhookSubscription,
};
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid delivery: {0}")]
    InvalidDelivery(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Attempt budget of a new delivery: the requested one, or `default`.
pub(crate) fn resolve_max_attempts(requested: Option<i32>, default: i32) -> StoreResult<i32> {
    let max_attempts = requested.unwrap_or(default);
    if max_attempts < 1 {
        return Err(StoreError::InvalidDelivery(format!(
            "max_attempts must be at least 1, got {}",
            max_attempts
        )));
    }
    Ok(max_attempts)
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Up to `limit` due deliveries, oldest first, each resolved against its
    /// subscription in the same read. Inactive subscriptions are skipped.
    async fn fetch_due_deliveries(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<DueDelivery>>;

    /// `pending|retrying -> delivering`, only while attempts remain. `false`
    /// means the delivery is no longer due, usually because another
    /// invocation claimed it first.
    async fn claim_delivery(
        &self,
        id: &str,
        claim_token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Count one attempt and apply `result`, only if `claim_token` still owns
    /// the delivery and attempts remain.
    async fn mark_attempt_result(
        &self,
        id: &str,
        claim_token: &str,
        result: &AttemptResult,
    ) -> StoreResult<bool>;

    /// Fail a claimed delivery permanently, exhausting its attempts.
    async fn mark_abandoned(&self, id: &str, claim_token: &str, reason: &str)
        -> StoreResult<bool>;

    async fn fetch_stale_claims(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<StaleClaim>>;

    /// Rejects a `max_attempts` below 1 with `StoreError::InvalidDelivery`.
    async fn enqueue_delivery(&self, new: NewDelivery) -> StoreResult<WebhookDelivery>;

    /// Enqueue `event_type` for every active subscription that listens for it.
    async fn enqueue_event(
        &self,
        event_type: &str,
        event_data: serde_json::Value,
        max_attempts: Option<i32>,
    ) -> StoreResult<Vec<WebhookDelivery>>;

    async fn get_subscription(&self, id: &str) -> StoreResult<Option<WebhookSubscription>>;

    async fn get_delivery(&self, id: &str) -> StoreResult<Option<WebhookDelivery>>;

    /// Newest first.
    async fn list_recent_deliveries(
        &self,
        webhook_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<WebhookDelivery>>;

    async fn health_check(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_max_attempts() {
        assert_eq!(resolve_max_attempts(None, 5).unwrap(), 5);
        assert_eq!(resolve_max_attempts(Some(2), 5).unwrap(), 2);
        assert!(matches!(
            resolve_max_attempts(Some(0), 5),
            Err(StoreError::InvalidDelivery(_))
        ));
        assert!(resolve_max_attempts(Some(-1), 5).is_err());
        assert!(resolve_max_attempts(None, 0).is_err());
    }
}
