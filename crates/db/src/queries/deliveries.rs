//! Webhook delivery database operations.
//!
//! Every state change that a concurrent dispatcher could race on is a
//! conditional `UPDATE`; callers inspect `rows_affected` to learn whether they
//! won.

use crate::models::{DeliveryStatus, DueDeliveryRow, WebhookDelivery};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Insert a new `pending` delivery.
pub async fn create<'e, E>(
    executor: E,
    id: &str,
    webhook_id: &str,
    event_type: &str,
    event_data: &serde_json::Value,
    max_attempts: i32,
) -> Result<WebhookDelivery, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, WebhookDelivery>(
        r#"
        INSERT INTO webhook_deliveries (id, webhook_id, event_type, event_data, max_attempts)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, webhook_id, event_type, event_data, status, attempt_number, max_attempts,
                  next_attempt_at, response_status, error_message, claim_token, claimed_at,
                  created_at, updated_at, delivered_at
        "#,
    )
    .bind(id)
    .bind(webhook_id)
    .bind(event_type)
    .bind(event_data)
    .bind(max_attempts)
    .fetch_one(executor)
    .await
}

/// Load due deliveries, oldest first, together with their subscription target.
///
/// Deliveries of inactive subscriptions are skipped; deliveries whose
/// subscription row is gone come back with a `NULL` target.
pub async fn fetch_due(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<DueDeliveryRow>, sqlx::Error> {
    sqlx::query_as::<_, DueDeliveryRow>(
        r#"
        SELECT d.id, d.webhook_id, d.event_type, d.event_data, d.status, d.attempt_number,
               d.max_attempts, d.next_attempt_at, d.response_status, d.error_message,
               d.claim_token, d.claimed_at, d.created_at, d.updated_at, d.delivered_at,
               w.target_url, w.secret
        FROM webhook_deliveries d
        LEFT JOIN webhooks w ON w.id = d.webhook_id
        WHERE d.status IN ('pending', 'retrying')
          AND d.attempt_number < d.max_attempts
          AND (d.next_attempt_at IS NULL OR d.next_attempt_at <= $1)
          AND (w.id IS NULL OR w.active)
        ORDER BY d.created_at ASC, d.id ASC
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Move a due delivery with attempts left to `delivering` if nobody else has.
pub async fn claim(
    pool: &PgPool,
    id: &str,
    claim_token: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = 'delivering',
            claim_token = $2,
            claimed_at = $3,
            updated_at = now()
        WHERE id = $1
          AND status IN ('pending', 'retrying')
          AND attempt_number < max_attempts
          AND (next_attempt_at IS NULL OR next_attempt_at <= $3)
        "#,
    )
    .bind(id)
    .bind(claim_token)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record the outcome of one attempt against the claim that made it.
#[allow(clippy::too_many_arguments)]
pub async fn complete_attempt(
    pool: &PgPool,
    id: &str,
    claim_token: &str,
    status: DeliveryStatus,
    response_status: Option<i32>,
    error_message: Option<&str>,
    next_attempt_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = $3,
            attempt_number = attempt_number + 1,
            response_status = $4,
            error_message = $5,
            next_attempt_at = $6,
            delivered_at = COALESCE(delivered_at, $7),
            claim_token = NULL,
            claimed_at = NULL,
            updated_at = now()
        WHERE id = $1
          AND claim_token = $2
          AND status = 'delivering'
          AND attempt_number < max_attempts
        "#,
    )
    .bind(id)
    .bind(claim_token)
    .bind(status)
    .bind(response_status)
    .bind(error_message)
    .bind(next_attempt_at)
    .bind(delivered_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Fail a claimed delivery permanently without attempting it.
pub async fn abandon(
    pool: &PgPool,
    id: &str,
    claim_token: &str,
    reason: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = 'failed',
            attempt_number = max_attempts,
            response_status = NULL,
            error_message = $3,
            next_attempt_at = NULL,
            claim_token = NULL,
            claimed_at = NULL,
            updated_at = now()
        WHERE id = $1
          AND claim_token = $2
          AND status = 'delivering'
        "#,
    )
    .bind(id)
    .bind(claim_token)
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Deliveries stuck in `delivering` since before `stale_before`.
pub async fn list_stale(
    pool: &PgPool,
    stale_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<WebhookDelivery>, sqlx::Error> {
    sqlx::query_as::<_, WebhookDelivery>(
        r#"
        SELECT id, webhook_id, event_type, event_data, status, attempt_number, max_attempts,
               next_attempt_at, response_status, error_message, claim_token, claimed_at,
               created_at, updated_at, delivered_at
        FROM webhook_deliveries
        WHERE status = 'delivering'
          AND claimed_at < $1
        ORDER BY created_at ASC, id ASC
        LIMIT $2
        "#,
    )
    .bind(stale_before)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Recent deliveries for a webhook, newest first.
pub async fn list_by_webhook(
    pool: &PgPool,
    webhook_id: &str,
    limit: i64,
) -> Result<Vec<WebhookDelivery>, sqlx::Error> {
    sqlx::query_as::<_, WebhookDelivery>(
        r#"
        SELECT id, webhook_id, event_type, event_data, status, attempt_number, max_attempts,
               next_attempt_at, response_status, error_message, claim_token, claimed_at,
               created_at, updated_at, delivered_at
        FROM webhook_deliveries
        WHERE webhook_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(webhook_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Fetch a delivery by its unique ID.
pub async fn get_by_id(pool: &PgPool, id: &str) -> Result<Option<WebhookDelivery>, sqlx::Error> {
    sqlx::query_as::<_, WebhookDelivery>(
        r#"
        SELECT id, webhook_id, event_type, event_data, status, attempt_number, max_attempts,
               next_attempt_at, response_status, error_message, claim_token, claimed_at,
               created_at, updated_at, delivered_at
        FROM webhook_deliveries
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}
