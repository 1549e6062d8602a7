use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_core::types::{
    AttemptResult, DueDelivery, NewDelivery, StaleClaim, WebhookDelivery, WebhookSubscription,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::warn;

use super::{resolve_max_attempts, DeliveryStore, StoreResult};
use crate::queries::{deliveries, webhooks};

#[derive(Clone)]
pub struct PgDeliveryStore {
    pool: PgPool,
    default_max_attempts: i32,
}

impl PgDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_max_attempts: quill_core::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Attempt budget for deliveries enqueued without one.
    pub fn with_default_max_attempts(mut self, default_max_attempts: i32) -> Self {
        self.default_max_attempts = default_max_attempts;
        self
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
    async fn fetch_due_deliveries(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<DueDelivery>> {
        let rows = deliveries::fetch_due(&self.pool, now, limit).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn claim_delivery(
        &self,
        id: &str,
        claim_token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(deliveries::claim(&self.pool, id, claim_token, now).await?)
    }

    async fn mark_attempt_result(
        &self,
        id: &str,
        claim_token: &str,
        result: &AttemptResult,
    ) -> StoreResult<bool> {
        Ok(deliveries::complete_attempt(
            &self.pool,
            id,
            claim_token,
            result.status.into(),
            result.response_status,
            result.error_message.as_deref(),
            result.next_attempt_at,
            result.delivered_at,
        )
        .await?)
    }

    async fn mark_abandoned(
        &self,
        id: &str,
        claim_token: &str,
        reason: &str,
    ) -> StoreResult<bool> {
        Ok(deliveries::abandon(&self.pool, id, claim_token, reason).await?)
    }

    async fn fetch_stale_claims(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<StaleClaim>> {
        let rows = deliveries::list_stale(&self.pool, stale_before, limit).await?;
        let mut claims = Vec::with_capacity(rows.len());
        for row in rows {
            match (row.claim_token.clone(), row.claimed_at) {
                (Some(claim_token), Some(claimed_at)) => claims.push(StaleClaim {
                    delivery: row.into(),
                    claim_token,
                    claimed_at,
                }),
                _ => warn!(delivery_id = %row.id, "delivering row without claim bookkeeping"),
            }
        }
        Ok(claims)
    }

    async fn enqueue_delivery(&self, new: NewDelivery) -> StoreResult<WebhookDelivery> {
        let max_attempts = resolve_max_attempts(new.max_attempts, self.default_max_attempts)?;
        let row = deliveries::create(
            &self.pool,
            &quill_core::new_delivery_id(),
            &new.webhook_id,
            &new.event_type,
            &new.event_data,
            max_attempts,
        )
        .await?;
        Ok(row.into())
    }

    async fn enqueue_event(
        &self,
        event_type: &str,
        event_data: serde_json::Value,
        max_attempts: Option<i32>,
    ) -> StoreResult<Vec<WebhookDelivery>> {
        let max_attempts = resolve_max_attempts(max_attempts, self.default_max_attempts)?;
        let mut tx = self.pool.begin().await?;
        let subscriptions = webhooks::list_active_for_event(&mut *tx, event_type).await?;

        let mut created = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let row = deliveries::create(
                &mut *tx,
                &quill_core::new_delivery_id(),
                &subscription.id,
                event_type,
                &event_data,
                max_attempts,
            )
            .await?;
            created.push(row.into());
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_subscription(&self, id: &str) -> StoreResult<Option<WebhookSubscription>> {
        Ok(webhooks::get_by_id(&self.pool, id).await?.map(Into::into))
    }

    async fn get_delivery(&self, id: &str) -> StoreResult<Option<WebhookDelivery>> {
        Ok(deliveries::get_by_id(&self.pool, id).await?.map(Into::into))
    }

    async fn list_recent_deliveries(
        &self,
        webhook_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<WebhookDelivery>> {
        let rows = deliveries::list_by_webhook(&self.pool, webhook_id, limit).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
