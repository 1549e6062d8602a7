use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    Delivered,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivering => "delivering",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
        }
    }

    /// `delivered` and `failed` are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }

    /// States a dispatcher may claim from, subject to `next_attempt_at`.
    pub fn is_claimable(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Retrying)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: String,
    pub target_url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub subscribed_events: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn wants(&self, event_type: &str) -> bool {
        self.subscribed_events.iter().any(|e| e == event_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
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
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable()
            && self.attempt_number < self.max_attempts
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Where and how a delivery is sent, resolved from its subscription at fetch time.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub url: String,
    pub secret: String,
}

impl fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryTarget")
            .field("url", &self.url)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A due delivery together with its subscription's target.
///
/// `target` is `None` when the owning subscription no longer exists.
#[derive(Debug, Clone)]
pub struct DueDelivery {
    pub delivery: WebhookDelivery,
    pub target: Option<DeliveryTarget>,
}

/// A delivery left in `delivering` by an invocation that never finished it.
#[derive(Debug, Clone)]
pub struct StaleClaim {
    pub delivery: WebhookDelivery,
    pub claim_token: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub webhook_id: String,
    pub event_type: String,
    pub event_data: serde_json::Value,
    /// `None` takes the store's configured default.
    pub max_attempts: Option<i32>,
}

/// The state a delivery moves to after one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
    pub status: DeliveryStatus,
    pub response_status: Option<i32>,
    pub error_message: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Aggregate result of one dispatch invocation.
///
/// `attempted` counts the deliveries this invocation claimed. Recovered stale
/// claims are counted in `reclaimed`, and those that used up their last
/// attempt are counted in `failed` as well.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub retrying: usize,
    pub failed: usize,
    #[serde(default)]
    pub reclaimed: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn delivery(status: DeliveryStatus, next_attempt_at: Option<DateTime<Utc>>) -> WebhookDelivery {
        WebhookDelivery {
            id: "dlv_1".to_string(),
            webhook_id: "wh_1".to_string(),
            event_type: "note.created".to_string(),
            event_data: json!({"id": "note_1"}),
            status,
            attempt_number: 0,
            max_attempts: 3,
            next_attempt_at,
            response_status: None,
            error_message: None,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let value = serde_json::to_value(DeliveryStatus::Retrying).unwrap();
        assert_eq!(value, json!("retrying"));
        assert_eq!(DeliveryStatus::Delivering.to_string(), "delivering");
    }

    #[test]
    fn test_terminal_states() {
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::Retrying.is_terminal());
        assert!(!DeliveryStatus::Delivering.is_terminal());
    }

    #[test]
    fn test_pending_without_schedule_is_due() {
        assert!(delivery(DeliveryStatus::Pending, None).is_due(Utc::now()));
    }

    #[test]
    fn test_retrying_waits_for_next_attempt() {
        let now = Utc::now();
        let later = delivery(DeliveryStatus::Retrying, Some(now + Duration::seconds(30)));
        assert!(!later.is_due(now));
        assert!(later.is_due(now + Duration::seconds(30)));
    }

    #[test]
    fn test_exhausted_delivery_is_never_due() {
        let mut exhausted = delivery(DeliveryStatus::Retrying, None);
        exhausted.attempt_number = exhausted.max_attempts;
        assert!(!exhausted.is_due(Utc::now()));

        exhausted.max_attempts = 0;
        exhausted.attempt_number = 0;
        assert!(!exhausted.is_due(Utc::now()));
    }

    #[test]
    fn test_delivering_is_never_due() {
        assert!(!delivery(DeliveryStatus::Delivering, None).is_due(Utc::now()));
        assert!(!delivery(DeliveryStatus::Failed, None).is_due(Utc::now()));
    }

    #[test]
    fn test_subscription_secret_not_serialized() {
        let sub = WebhookSubscription {
            id: "wh_1".to_string(),
            target_url: "https://example.com/hook".to_string(),
            secret: "shh".to_string(),
            subscribed_events: vec!["note.created".to_string()],
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&sub).unwrap();
        assert!(value.get("secret").is_none());
        assert!(sub.wants("note.created"));
        assert!(!sub.wants("note.deleted"));
    }

    #[test]
    fn test_target_debug_redacts_secret() {
        let target = DeliveryTarget {
            url: "https://example.com".to_string(),
            secret: "top-secret".to_string(),
        };
        assert!(!format!("{:?}", target).contains("top-secret"));
    }

    #[test]
    fn test_summary_uses_camel_case() {
        let summary = DispatchSummary {
            attempted: 2,
            delivered: 1,
            failed: 1,
            ..Default::default()
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["attempted"], 2);
        assert_eq!(value["reclaimed"], 0);
        assert!(value["errors"].as_array().unwrap().is_empty());
    }
}
