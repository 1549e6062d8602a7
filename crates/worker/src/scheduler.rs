use anyhow::{bail, Context};
use quill_core::types::DispatchSummary;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub const CRON_ROUTE: &str = "/internal/cron/webhook-deliveries";

/// Calls the scheduled dispatch trigger on a fixed interval.
pub struct Scheduler {
    client: reqwest::Client,
    endpoint: String,
    cron_secret: String,
}

impl Scheduler {
    pub fn new(api_url: &str, cron_secret: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", api_url.trim_end_matches('/'), CRON_ROUTE),
            cron_secret,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One trigger call. Any non-2xx answer is an error.
    pub async fn tick(&self) -> anyhow::Result<DispatchSummary> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.cron_secret)
            .send()
            .await
            .with_context(|| format!("dispatch trigger unreachable at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("dispatch trigger returned {}: {}", status, body.trim());
        }

        response
            .json::<DispatchSummary>()
            .await
            .context("dispatch trigger returned an unreadable summary")
    }

    /// Ticks until `shutdown` resolves. Failures are logged and the loop goes on.
    pub async fn run<F>(&self, interval: Duration, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick_logged().await,
                _ = &mut shutdown => break,
            }
        }
    }

    pub async fn tick_logged(&self) {
        match self.tick().await {
            Ok(summary) => info!(
                attempted = summary.attempted,
                delivered = summary.delivered,
                retrying = summary.retrying,
                failed = summary.failed,
                reclaimed = summary.reclaimed,
                errors = summary.errors.len(),
                "dispatch tick complete"
            ),
            Err(err) => error!(endpoint = %self.endpoint, error = ?err, "dispatch tick failed"),
        }
    }
}
