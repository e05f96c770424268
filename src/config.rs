//! Reconciliation engine tuning, environment-driven with sane defaults.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Cadence between sequential status checks while a payment is pending.
    pub poll_interval: Duration,
    /// First backoff delay after a rate-limit response; doubles per
    /// consecutive hit.
    pub rate_limit_base_delay: Duration,
    /// Consecutive rate-limit hits absorbed by backoff before the poller
    /// falls back to the normal cadence.
    pub rate_limit_max_retries: u32,
    /// Subscription length granted per approved activation or renewal.
    pub billing_period_days: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            rate_limit_base_delay: Duration::from_secs(3),
            rate_limit_max_retries: 5,
            billing_period_days: 30,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_secs("RECON_POLL_INTERVAL_SECS")
                .unwrap_or(defaults.poll_interval),
            rate_limit_base_delay: env_secs("RECON_RATE_LIMIT_BASE_DELAY_SECS")
                .unwrap_or(defaults.rate_limit_base_delay),
            rate_limit_max_retries: env_parse("RECON_RATE_LIMIT_MAX_RETRIES")
                .unwrap_or(defaults.rate_limit_max_retries),
            billing_period_days: env_parse("BILLING_PERIOD_DAYS")
                .unwrap_or(defaults.billing_period_days),
        }
    }

    pub fn billing_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.billing_period_days)
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
