//! In-memory implementation of the delivery store.
//!
//! Used by tests and by local development when no database is configured.
//! Nothing survives a restart. Every mutation runs under one write lock, which
//! is what makes the claim/complete compare-and-set atomic here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_core::types::{
    AttemptResult, DeliveryStatus, DueDelivery, DeliveryTarget, NewDelivery, StaleClaim,
    WebhookDelivery, WebhookSubscription,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{resolve_max_attempts, DeliveryStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct DeliveryRecord {
    seq: u64,
    delivery: WebhookDelivery,
    claim_token: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    subscriptions: HashMap<String, WebhookSubscription>,
    deliveries: HashMap<String, DeliveryRecord>,
}

impl State {
    fn insert(&mut self, delivery: WebhookDelivery) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.deliveries.insert(
            delivery.id.clone(),
            DeliveryRecord {
                seq,
                delivery,
                claim_token: None,
                claimed_at: None,
            },
        );
    }

    fn oldest_first<'a>(
        &'a self,
        filter: impl Fn(&DeliveryRecord) -> bool,
    ) -> Vec<&'a DeliveryRecord> {
        let mut records: Vec<&DeliveryRecord> =
            self.deliveries.values().filter(|r| filter(*r)).collect();
        records.sort_by_key(|r| (r.delivery.created_at, r.seq));
        records
    }

    fn claimed_mut(&mut self, id: &str, claim_token: &str) -> Option<&mut DeliveryRecord> {
        self.deliveries.get_mut(id).filter(|r| {
            r.delivery.status == DeliveryStatus::Delivering
                && r.claim_token.as_deref() == Some(claim_token)
        })
    }
}

#[derive(Debug)]
pub struct MemoryDeliveryStore {
    state: RwLock<State>,
    offline: AtomicBool,
    operations: AtomicU64,
    default_max_attempts: i32,
}

impl Default for MemoryDeliveryStore {
    fn default() -> Self {
        Self::with_default_max_attempts(quill_core::DEFAULT_MAX_ATTEMPTS)
    }
}

impl MemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose new deliveries get `default_max_attempts` unless the
    /// producer asks for another budget.
    pub fn with_default_max_attempts(default_max_attempts: i32) -> Self {
        Self {
            state: RwLock::default(),
            offline: AtomicBool::new(false),
            operations: AtomicU64::new(0),
            default_max_attempts,
        }
    }

    pub async fn insert_subscription(&self, subscription: WebhookSubscription) {
        let mut state = self.state.write().await;
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    pub async fn remove_subscription(&self, id: &str) -> Option<WebhookSubscription> {
        self.state.write().await.subscriptions.remove(id)
    }

    /// Make every trait operation fail as if the backend were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of trait operations served so far.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    fn enter(&self) -> StoreResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn new_record(
        webhook_id: String,
        event_type: String,
        event_data: serde_json::Value,
        max_attempts: i32,
    ) -> WebhookDelivery {
        WebhookDelivery {
            id: quill_core::new_delivery_id(),
            webhook_id,
            event_type,
            event_data,
            status: DeliveryStatus::Pending,
            attempt_number: 0,
            max_attempts,
            next_attempt_at: None,
            response_status: None,
            error_message: None,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn fetch_due_deliveries(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<DueDelivery>> {
        self.enter()?;
        let state = self.state.read().await;
        let limit = usize::try_from(limit).unwrap_or(0);

        let due = state
            .oldest_first(|r| r.delivery.is_due(now))
            .into_iter()
            .filter_map(|r| match state.subscriptions.get(&r.delivery.webhook_id) {
                Some(sub) if !sub.active => None,
                Some(sub) => Some(DueDelivery {
                    delivery: r.delivery.clone(),
                    target: Some(DeliveryTarget {
                        url: sub.target_url.clone(),
                        secret: sub.secret.clone(),
                    }),
                }),
                None => Some(DueDelivery {
                    delivery: r.delivery.clone(),
                    target: None,
                }),
            })
            .take(limit)
            .collect();

        Ok(due)
    }

    async fn claim_delivery(
        &self,
        id: &str,
        claim_token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.enter()?;
        let mut state = self.state.write().await;
        let Some(record) = state.deliveries.get_mut(id) else {
            return Ok(false);
        };
        // is_due also refuses deliveries without attempts left.
        if !record.delivery.is_due(now) {
            return Ok(false);
        }

        record.delivery.status = DeliveryStatus::Delivering;
        record.claim_token = Some(claim_token.to_string());
        record.claimed_at = Some(now);
        Ok(true)
    }

    async fn mark_attempt_result(
        &self,
        id: &str,
        claim_token: &str,
        result: &AttemptResult,
    ) -> StoreResult<bool> {
        self.enter()?;
        let mut state = self.state.write().await;
        let Some(record) = state.claimed_mut(id, claim_token) else {
            return Ok(false);
        };
        let delivery = &mut record.delivery;
        if delivery.attempt_number >= delivery.max_attempts {
            return Ok(false);
        }

        delivery.attempt_number += 1;
        delivery.status = result.status;
        delivery.response_status = result.response_status;
        delivery.error_message = result.error_message.clone();
        delivery.next_attempt_at = result.next_attempt_at;
        if delivery.delivered_at.is_none() {
            delivery.delivered_at = result.delivered_at;
        }
        record.claim_token = None;
        record.claimed_at = None;
        Ok(true)
    }

    async fn mark_abandoned(
        &self,
        id: &str,
        claim_token: &str,
        reason: &str,
    ) -> StoreResult<bool> {
        self.enter()?;
        let mut state = self.state.write().await;
        let Some(record) = state.claimed_mut(id, claim_token) else {
            return Ok(false);
        };

        let delivery = &mut record.delivery;
        delivery.status = DeliveryStatus::Failed;
        delivery.attempt_number = delivery.max_attempts;
        delivery.response_status = None;
        delivery.error_message = Some(reason.to_string());
        delivery.next_attempt_at = None;
        record.claim_token = None;
        record.claimed_at = None;
        Ok(true)
    }

    async fn fetch_stale_claims(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<StaleClaim>> {
        self.enter()?;
        let state = self.state.read().await;
        let limit = usize::try_from(limit).unwrap_or(0);

        let stale = state
            .oldest_first(|r| {
                r.delivery.status == DeliveryStatus::Delivering
                    && r.claimed_at.is_some_and(|at| at < stale_before)
            })
            .into_iter()
            .filter_map(|r| {
                Some(StaleClaim {
                    delivery: r.delivery.clone(),
                    claim_token: r.claim_token.clone()?,
                    claimed_at: r.claimed_at?,
                })
            })
            .take(limit)
            .collect();

        Ok(stale)
    }

    async fn enqueue_delivery(&self, new: NewDelivery) -> StoreResult<WebhookDelivery> {
        self.enter()?;
        let max_attempts = resolve_max_attempts(new.max_attempts, self.default_max_attempts)?;
        let delivery = Self::new_record(new.webhook_id, new.event_type, new.event_data, max_attempts);
        self.state.write().await.insert(delivery.clone());
        Ok(delivery)
    }

    async fn enqueue_event(
        &self,
        event_type: &str,
        event_data: serde_json::Value,
        max_attempts: Option<i32>,
    ) -> StoreResult<Vec<WebhookDelivery>> {
        self.enter()?;
        let max_attempts = resolve_max_attempts(max_attempts, self.default_max_attempts)?;
        let mut state = self.state.write().await;

        let mut subscriptions: Vec<&WebhookSubscription> = state
            .subscriptions
            .values()
            .filter(|s| s.active && s.wants(event_type))
            .collect();
        subscriptions.sort_by_key(|s| s.created_at);

        let created: Vec<WebhookDelivery> = subscriptions
            .into_iter()
            .map(|s| {
                Self::new_record(
                    s.id.clone(),
                    event_type.to_string(),
                    event_data.clone(),
                    max_attempts,
                )
            })
            .collect();

        for delivery in &created {
            state.insert(delivery.clone());
        }
        Ok(created)
    }

    async fn get_subscription(&self, id: &str) -> StoreResult<Option<WebhookSubscription>> {
        self.enter()?;
        Ok(self.state.read().await.subscriptions.get(id).cloned())
    }

    async fn get_delivery(&self, id: &str) -> StoreResult<Option<WebhookDelivery>> {
        self.enter()?;
        Ok(self
            .state
            .read()
            .await
            .deliveries
            .get(id)
            .map(|r| r.delivery.clone()))
    }

    async fn list_recent_deliveries(
        &self,
        webhook_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<WebhookDelivery>> {
        self.enter()?;
        let state = self.state.read().await;
        let limit = usize::try_from(limit).unwrap_or(0);

        let mut records = state.oldest_first(|r| r.delivery.webhook_id == webhook_id);
        records.reverse();
        Ok(records
            .into_iter()
            .take(limit)
            .map(|r| r.delivery.clone())
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.enter()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
