use crate::models::Webhook;
use sqlx::PgPool;

pub async fn get_by_id(pool: &PgPool, id: &str) -> Result<Option<Webhook>, sqlx::Error> {
    sqlx::query_as::<_, Webhook>(
        r#"
        SELECT id, target_url, secret, subscribed_events, active, created_at, updated_at
        FROM webhooks
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Active subscriptions that listen for `event_type`, oldest first.
pub async fn list_active_for_event<'e, E>(
    executor: E,
    event_type: &str,
) -> Result<Vec<Webhook>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Webhook>(
        r#"
        SELECT id, target_url, secret, subscribed_events, active, created_at, updated_at
        FROM webhooks
        WHERE active AND $1 = ANY(subscribed_events)
        ORDER BY created_at ASC
        "#,
    )
    .bind(event_type)
    .fetch_all(executor)
    .await
}
