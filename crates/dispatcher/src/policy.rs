use chrono::{DateTime, Utc};
use quill_core::config::DispatchSettings;
use quill_core::types::{AttemptResult, DeliveryStatus, WebhookDelivery};
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a cap and symmetric jitter.
///
/// `backoff(n) = min(base * 2^(n-1), cap)` where `n` is the number of attempts
/// made so far; the jittered delay moves that by at most `jitter * delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.backoff_base_secs),
            Duration::from_secs(settings.backoff_cap_secs),
            settings.backoff_jitter,
        )
    }

    /// Retry immediately; handy for tests and manual drains.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Delay before the next attempt, without jitter.
    pub fn backoff(&self, attempts_made: i32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).clamp(0, 63) as u32;
        let multiplier = 2_u64.saturating_pow(exponent);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(base_ms.saturating_mul(multiplier));
        delay.min(self.cap)
    }

    /// [`backoff`](Self::backoff) moved by a random offset within the jitter band.
    pub fn jittered_backoff(&self, attempts_made: i32) -> Duration {
        let delay = self.backoff(attempts_made);
        let spread = delay.as_secs_f64() * self.jitter;
        if spread <= 0.0 {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }

    /// Next state after a 2xx.
    pub fn on_success(&self, response_status: i32, now: DateTime<Utc>) -> AttemptResult {
        AttemptResult {
            status: DeliveryStatus::Delivered,
            response_status: Some(response_status),
            error_message: None,
            next_attempt_at: None,
            delivered_at: Some(now),
        }
    }

    /// Next state after any failed attempt of `delivery`, which still carries
    /// the attempt count from before this attempt.
    pub fn on_failure(
        &self,
        delivery: &WebhookDelivery,
        response_status: Option<i32>,
        error_message: String,
        now: DateTime<Utc>,
    ) -> AttemptResult {
        let attempts_made = delivery.attempt_number.saturating_add(1);
        if attempts_made >= delivery.max_attempts {
            return AttemptResult {
                status: DeliveryStatus::Failed,
                response_status,
                error_message: Some(error_message),
                next_attempt_at: None,
                delivered_at: None,
            };
        }

        let delay = self.jittered_backoff(attempts_made);
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        AttemptResult {
            status: DeliveryStatus::Retrying,
            response_status,
            error_message: Some(error_message),
            next_attempt_at: Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)),
            delivered_at: None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&DispatchSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delivery(attempt_number: i32, max_attempts: i32) -> WebhookDelivery {
        WebhookDelivery {
            id: "dlv_1".to_string(),
            webhook_id: "wh_1".to_string(),
            event_type: "note.created".to_string(),
            event_data: json!({}),
            status: DeliveryStatus::Delivering,
            attempt_number,
            max_attempts,
            next_attempt_at: None,
            response_status: None,
            error_message: None,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = RetryPolicy::new(secs(30), secs(3600), 0.0);
        assert_eq!(policy.backoff(1), secs(30));
        assert_eq!(policy.backoff(2), secs(60));
        assert_eq!(policy.backoff(3), secs(120));
        assert_eq!(policy.backoff(4), secs(240));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(secs(30), secs(300), 0.0);
        assert_eq!(policy.backoff(4), secs(240));
        assert_eq!(policy.backoff(5), secs(300));
        assert_eq!(policy.backoff(6), secs(300));
    }

    #[test]
    fn test_backoff_overflow_protection() {
        let policy = RetryPolicy::new(secs(30), secs(3600), 0.0);
        assert_eq!(policy.backoff(100), secs(3600));
        assert_eq!(policy.backoff(i32::MAX), secs(3600));
        assert_eq!(policy.backoff(0), secs(30));
        assert_eq!(policy.backoff(-3), secs(30));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let policy = RetryPolicy::new(secs(100), secs(3600), 0.1);
        for _ in 0..200 {
            let delay = policy.jittered_backoff(1).as_secs_f64();
            assert!((90.0..=110.0).contains(&delay), "delay {} out of band", delay);
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = RetryPolicy::new(secs(10), secs(3600), 0.0);
        assert_eq!(policy.jittered_backoff(3), secs(40));
        assert_eq!(RetryPolicy::immediate().jittered_backoff(5), Duration::ZERO);
    }

    #[test]
    fn test_success_sets_delivered_at() {
        let now = Utc::now();
        let result = RetryPolicy::default().on_success(204, now);
        assert_eq!(result.status, DeliveryStatus::Delivered);
        assert_eq!(result.response_status, Some(204));
        assert_eq!(result.delivered_at, Some(now));
        assert!(result.next_attempt_at.is_none());
        assert!(result.error_message.is_none());
    }

    #[test]
    fn test_failure_schedules_retry() {
        let now = Utc::now();
        let policy = RetryPolicy::new(secs(30), secs(3600), 0.0);
        let result = policy.on_failure(&delivery(1, 5), Some(503), "HTTP 503".to_string(), now);

        assert_eq!(result.status, DeliveryStatus::Retrying);
        assert_eq!(result.response_status, Some(503));
        assert_eq!(result.next_attempt_at, Some(now + chrono::Duration::seconds(60)));
        assert!(result.delivered_at.is_none());
    }

    #[test]
    fn test_last_failure_is_terminal() {
        let now = Utc::now();
        let result = RetryPolicy::default().on_failure(
            &delivery(2, 3),
            None,
            "connection refused".to_string(),
            now,
        );
        assert_eq!(result.status, DeliveryStatus::Failed);
        assert!(result.next_attempt_at.is_none());
        assert_eq!(result.error_message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_single_attempt_budget_fails_immediately() {
        let result =
            RetryPolicy::default().on_failure(&delivery(0, 1), Some(500), "HTTP 500".into(), Utc::now());
        assert_eq!(result.status, DeliveryStatus::Failed);
    }

    #[test]
    fn test_from_settings() {
        let settings = DispatchSettings {
            backoff_base_secs: 5,
            backoff_cap_secs: 20,
            backoff_jitter: 0.0,
            ..Default::default()
        };
        let policy = RetryPolicy::from_settings(&settings);
        assert_eq!(policy.backoff(1), secs(5));
        assert_eq!(policy.backoff(4), secs(20));
    }
}
