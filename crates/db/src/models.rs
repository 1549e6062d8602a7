use chrono::{DateTime, Utc};
use quill_core::types as domain;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "webhook_delivery_status", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    Delivered,
    Failed,
    Retrying,
}

impl From<DeliveryStatus> for domain::DeliveryStatus {
    fn from(status: DeliveryStatus) -> Self {
        match status {
            DeliveryStatus::Pending => domain::DeliveryStatus::Pending,
            DeliveryStatus::Delivering => domain::DeliveryStatus::Delivering,
            DeliveryStatus::Delivered => domain::DeliveryStatus::Delivered,
            DeliveryStatus::Failed => domain::DeliveryStatus::Failed,
            DeliveryStatus::Retrying => domain::DeliveryStatus::Retrying,
        }
    }
}

impl From<domain::DeliveryStatus> for DeliveryStatus {
    fn from(status: domain::DeliveryStatus) -> Self {
        match status {
            domain::DeliveryStatus::Pending => DeliveryStatus::Pending,
            domain::DeliveryStatus::Delivering => DeliveryStatus::Delivering,
            domain::DeliveryStatus::Delivered => DeliveryStatus::Delivered,
            domain::DeliveryStatus::Failed => DeliveryStatus::Failed,
            domain::DeliveryStatus::Retrying => DeliveryStatus::Retrying,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Webhook {
    pub id: String,
    pub target_url: String,
    pub secret: String,
    pub subscribed_events: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Webhook> for domain::WebhookSubscription {
    fn from(row: Webhook) -> Self {
        domain::WebhookSubscription {
            id: row.id,
            target_url: row.target_url,
            secret: row.secret,
            subscribed_events: row.subscribed_events,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookDelivery {
    pub id: String,
    pub webhook_id: String,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempt_number: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub error_message: Option<String>,
    pub claim_token: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl From<WebhookDelivery> for domain::WebhookDelivery {
    fn from(row: WebhookDelivery) -> Self {
        domain::WebhookDelivery {
            id: row.id,
            webhook_id: row.webhook_id,
            event_type: row.event_type,
            event_data: row.event_data,
            status: row.status.into(),
            attempt_number: row.attempt_number,
            max_attempts: row.max_attempts,
            next_attempt_at: row.next_attempt_at,
            response_status: row.response_status,
            error_message: row.error_message,
            created_at: row.created_at,
            delivered_at: row.delivered_at,
        }
    }
}

/// A due delivery joined with its subscription's target in one read.
#[derive(Debug, Clone, FromRow)]
pub struct DueDeliveryRow {
    #[sqlx(flatten)]
    pub delivery: WebhookDelivery,
    pub target_url: Option<String>,
    pub secret: Option<String>,
}

impl From<DueDeliveryRow> for domain::DueDelivery {
    fn from(row: DueDeliveryRow) -> Self {
        let target = match (row.target_url, row.secret) {
            (Some(url), Some(secret)) => Some(domain::DeliveryTarget { url, secret }),
            _ => None,
        };
        domain::DueDelivery {
            delivery: row.delivery.into(),
            target,
        }
    }
}
