use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use quill_core::config::DispatchSettings;
use quill_core::signing;
use quill_core::types::{AttemptResult, DeliveryStatus, DispatchSummary, DueDelivery, StaleClaim};
use quill_db::{DeliveryStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, DeliveryClient, OutboundRequest};
use crate::policy::RetryPolicy;

const ORPHAN_REASON: &str = "webhook subscription not found";

/// The invocation could not run at all. Per-delivery problems never surface
/// here; they end up in [`DispatchSummary::errors`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("delivery store unavailable: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on HTTP requests in flight within one invocation.
    pub concurrency: usize,
    /// A `delivering` claim older than this is treated as abandoned.
    pub stale_after: Duration,
}

impl DispatcherConfig {
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            concurrency: settings.concurrency,
            stale_after: settings.stale_after(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_settings(&DispatchSettings::default())
    }
}

pub struct Dispatcher {
    store: Arc<dyn DeliveryStore>,
    client: DeliveryClient,
    policy: RetryPolicy,
    config: DispatcherConfig,
}

struct Claimed {
    due: DueDelivery,
    claim_token: String,
}

enum ItemOutcome {
    Settled(DeliveryStatus),
    /// Our claim was taken over before the result landed.
    Lost,
    Error(String),
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        client: DeliveryClient,
        policy: RetryPolicy,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            client,
            policy,
            config: DispatcherConfig {
                concurrency: config.concurrency.max(1),
                ..config
            },
        }
    }

    pub fn from_settings(
        store: Arc<dyn DeliveryStore>,
        settings: &DispatchSettings,
    ) -> Result<Self, ClientError> {
        Ok(Self::new(
            store,
            DeliveryClient::new(settings.delivery_timeout())?,
            RetryPolicy::from_settings(settings),
            DispatcherConfig::from_settings(settings),
        ))
    }

    /// Attempts up to `limit` due deliveries once each.
    ///
    /// A non-positive `limit` is a no-op that never touches the store. Fails
    /// only when the due set cannot be read.
    pub async fn dispatch_pending_deliveries(
        &self,
        limit: i64,
    ) -> Result<DispatchSummary, DispatchError> {
        let mut summary = DispatchSummary::default();
        if limit <= 0 {
            return Ok(summary);
        }

        let now = Utc::now();
        self.recover_stale_claims(now, limit, &mut summary).await?;

        let due = self.store.fetch_due_deliveries(limit, now).await?;
        debug!(count = due.len(), limit, "fetched due deliveries");

        let mut claimed = Vec::with_capacity(due.len());
        for item in due {
            let claim_token = quill_core::new_claim_token();
            match self
                .store
                .claim_delivery(&item.delivery.id, &claim_token, Utc::now())
                .await
            {
                Ok(true) => claimed.push(Claimed {
                    due: item,
                    claim_token,
                }),
                Ok(false) => {
                    debug!(delivery_id = %item.delivery.id, "delivery already claimed elsewhere")
                }
                Err(err) => {
                    error!(delivery_id = %item.delivery.id, error = %err, "failed to claim delivery");
                    summary
                        .errors
                        .push(format!("{}: claim failed: {}", item.delivery.id, err));
                }
            }
        }

        let outcomes: Vec<ItemOutcome> = stream::iter(claimed)
            .map(|claimed| self.process(claimed))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            summary.attempted += 1;
            match outcome {
                ItemOutcome::Settled(DeliveryStatus::Delivered) => summary.delivered += 1,
                ItemOutcome::Settled(DeliveryStatus::Retrying) => summary.retrying += 1,
                ItemOutcome::Settled(DeliveryStatus::Failed) => summary.failed += 1,
                ItemOutcome::Settled(other) => {
                    warn!(status = %other, "attempt settled in unexpected status")
                }
                ItemOutcome::Lost => {}
                ItemOutcome::Error(message) => summary.errors.push(message),
            }
        }

        info!(
            attempted = summary.attempted,
            delivered = summary.delivered,
            retrying = summary.retrying,
            failed = summary.failed,
            reclaimed = summary.reclaimed,
            errors = summary.errors.len(),
            "dispatch finished"
        );

        Ok(summary)
    }

    /// Records a failed attempt for every claim left behind by an invocation
    /// that died mid-flight, so those deliveries become due again. A claim that
    /// used up its last attempt counts as `failed` too.
    async fn recover_stale_claims(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        summary: &mut DispatchSummary,
    ) -> Result<(), DispatchError> {
        let stale_after =
            chrono::Duration::from_std(self.config.stale_after).unwrap_or(chrono::Duration::MAX);
        let stale_before = now.checked_sub_signed(stale_after).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self.store.fetch_stale_claims(stale_before, limit).await?;
        for claim in stale {
            match self.reclaim(&claim, now).await {
                Ok(Some(status)) => {
                    summary.reclaimed += 1;
                    if status == DeliveryStatus::Failed {
                        summary.failed += 1;
                    }
                }
                Ok(None) => debug!(delivery_id = %claim.delivery.id, "stale claim already resolved"),
                Err(err) => {
                    error!(delivery_id = %claim.delivery.id, error = %err, "failed to reclaim delivery");
                    summary
                        .errors
                        .push(format!("{}: reclaim failed: {}", claim.delivery.id, err));
                }
            }
        }
        Ok(())
    }

    /// The status the delivery settled in, or `None` if the claim moved on.
    async fn reclaim(
        &self,
        claim: &StaleClaim,
        now: DateTime<Utc>,
    ) -> Result<Option<DeliveryStatus>, StoreError> {
        warn!(
            delivery_id = %claim.delivery.id,
            claimed_at = %claim.claimed_at,
            "recovering stale delivery claim"
        );
        let result = self.policy.on_failure(
            &claim.delivery,
            None,
            "delivery attempt interrupted".to_string(),
            now,
        );
        let recorded = self
            .store
            .mark_attempt_result(&claim.delivery.id, &claim.claim_token, &result)
            .await?;
        Ok(recorded.then_some(result.status))
    }

    async fn process(&self, claimed: Claimed) -> ItemOutcome {
        let Claimed { due, claim_token } = claimed;
        let delivery = &due.delivery;

        let Some(target) = due.target.as_ref() else {
            warn!(
                delivery_id = %delivery.id,
                webhook_id = %delivery.webhook_id,
                "subscription missing; failing delivery"
            );
            return match self
                .store
                .mark_abandoned(&delivery.id, &claim_token, ORPHAN_REASON)
                .await
            {
                Ok(true) => ItemOutcome::Settled(DeliveryStatus::Failed),
                Ok(false) => ItemOutcome::Lost,
                Err(err) => self.record_error(&delivery.id, err),
            };
        };

        let body = signing::canonical_json(&delivery.event_data);
        let timestamp = Utc::now().timestamp();
        let signature = signing::sign_body(&target.secret, &body, timestamp);

        let outcome = self
            .client
            .send(&OutboundRequest {
                url: &target.url,
                delivery_id: &delivery.id,
                event_type: &delivery.event_type,
                body: &body,
                signature: &signature,
                timestamp,
            })
            .await;

        let now = Utc::now();
        let result: AttemptResult = match (outcome.is_success(), outcome.response_status()) {
            (true, Some(status)) => self.policy.on_success(status, now),
            _ => self.policy.on_failure(
                delivery,
                outcome.response_status(),
                outcome.error_message().unwrap_or_default(),
                now,
            ),
        };

        match self
            .store
            .mark_attempt_result(&delivery.id, &claim_token, &result)
            .await
        {
            Ok(true) => {
                match result.status {
                    DeliveryStatus::Delivered => {
                        info!(delivery_id = %delivery.id, event_type = %delivery.event_type, "webhook delivered")
                    }
                    DeliveryStatus::Retrying => warn!(
                        delivery_id = %delivery.id,
                        attempt = delivery.attempt_number + 1,
                        error = result.error_message.as_deref().unwrap_or(""),
                        next_attempt_at = ?result.next_attempt_at,
                        "webhook attempt failed; will retry"
                    ),
                    _ => error!(
                        delivery_id = %delivery.id,
                        attempt = delivery.attempt_number + 1,
                        error = result.error_message.as_deref().unwrap_or(""),
                        "webhook delivery failed permanently"
                    ),
                }
                ItemOutcome::Settled(result.status)
            }
            Ok(false) => {
                warn!(delivery_id = %delivery.id, "claim lost before result was recorded");
                ItemOutcome::Lost
            }
            Err(err) => self.record_error(&delivery.id, err),
        }
    }

    fn record_error(&self, delivery_id: &str, err: StoreError) -> ItemOutcome {
        error!(delivery_id, error = %err, "failed to record delivery attempt");
        ItemOutcome::Error(format!("{}: {}", delivery_id, err))
    }
}
