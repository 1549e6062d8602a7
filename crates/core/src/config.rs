use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: Option<String>,
    pub api_bind: String,
    pub cron_secret: String,
    pub internal_token: String,
    pub cron_batch_size: i64,
    pub dispatch: DispatchSettings,
}

/// Tunables for the dispatcher.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DispatchSettings {
    pub concurrency: usize,
    pub delivery_timeout_secs: u64,
    pub invocation_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub backoff_jitter: f64,
    pub stale_claim_secs: u64,
    pub default_max_attempts: i32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            delivery_timeout_secs: 10,
            invocation_timeout_secs: 55,
            backoff_base_secs: 30,
            backoff_cap_secs: 3600,
            backoff_jitter: 0.1,
            stale_claim_secs: 120,
            default_max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl DispatchSettings {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = non_blank(lookup);

        let database_url = get("QUILL_DATABASE_URL").or_else(|| get("DATABASE_URL"));
        let api_bind = get("QUILL_API_BIND").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let cron_secret = get("QUILL_CRON_SECRET").ok_or(ConfigError::Missing("QUILL_CRON_SECRET"))?;
        let internal_token =
            get("QUILL_INTERNAL_TOKEN").ok_or(ConfigError::Missing("QUILL_INTERNAL_TOKEN"))?;

        let defaults = DispatchSettings::default();
        let dispatch = DispatchSettings {
            concurrency: parse_or(&get, "QUILL_DISPATCH_CONCURRENCY", defaults.concurrency)?,
            delivery_timeout_secs: parse_or(
                &get,
                "QUILL_DELIVERY_TIMEOUT_SECS",
                defaults.delivery_timeout_secs,
            )?,
            invocation_timeout_secs: parse_or(
                &get,
                "QUILL_DISPATCH_TIMEOUT_SECS",
                defaults.invocation_timeout_secs,
            )?,
            backoff_base_secs: parse_or(&get, "QUILL_BACKOFF_BASE_SECS", defaults.backoff_base_secs)?,
            backoff_cap_secs: parse_or(&get, "QUILL_BACKOFF_CAP_SECS", defaults.backoff_cap_secs)?,
            backoff_jitter: parse_or(&get, "QUILL_BACKOFF_JITTER", defaults.backoff_jitter)?,
            stale_claim_secs: parse_or(&get, "QUILL_STALE_CLAIM_SECS", defaults.stale_claim_secs)?,
            default_max_attempts: parse_or(
                &get,
                "QUILL_DEFAULT_MAX_ATTEMPTS",
                defaults.default_max_attempts,
            )?,
        };

        if dispatch.concurrency == 0 {
            return Err(invalid("QUILL_DISPATCH_CONCURRENCY", "0"));
        }
        if dispatch.default_max_attempts < 1 {
            return Err(invalid(
                "QUILL_DEFAULT_MAX_ATTEMPTS",
                &dispatch.default_max_attempts.to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&dispatch.backoff_jitter) {
            return Err(invalid("QUILL_BACKOFF_JITTER", &dispatch.backoff_jitter.to_string()));
        }

        let cron_batch_size = parse_or(&get, "QUILL_CRON_BATCH_SIZE", 50)?;

        Ok(Self {
            database_url,
            api_bind,
            cron_secret,
            internal_token,
            cron_batch_size,
            dispatch,
        })
    }
}

/// Settings of the scheduler binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub cron_secret: String,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = non_blank(lookup);
        let cron_secret = get("QUILL_CRON_SECRET").ok_or(ConfigError::Missing("QUILL_CRON_SECRET"))?;
        Ok(Self { cron_secret })
    }
}

/// Blank values count as unset.
fn non_blank<F>(lookup: F) -> impl Fn(&str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    move |key| lookup(key).filter(|v| !v.trim().is_empty())
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.trim().parse().map_err(|_| invalid(var, &raw)),
        None => Ok(default),
    }
}

fn invalid(var: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
    }
}
