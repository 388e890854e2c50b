use std::time::Duration;

use serde::Deserialize;

use crate::consts::{
    CLOSE_TIMEOUT, FALLBACK_POLL_INTERVAL, INITIAL_BACKOFF, MAX_BACKOFF, MAX_CONCURRENT_DELIVERIES,
    MAX_PENDING_NOTIFICATIONS, MAX_RECONNECT_ATTEMPTS, MAX_SUBSCRIBE_ATTEMPTS, OPEN_TIMEOUT,
    PRICE_TIMEOUT, SEND_TIMEOUT,
};
use crate::subscription::RetryPolicy;
use crate::types::{WatchError, WatchedWallet};

/// Prefix of every environment variable read by [`WatchConfig::from_env`].
pub const ENV_PREFIX: &str = "WATCH_";

/// Service configuration, read from `WATCH_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Laserstream gRPC endpoint URL.
    pub laserstream_endpoint: String,
    /// Laserstream API key.
    pub laserstream_api_key: String,
    /// Reconnects attempted inside the Laserstream client before a stream fails.
    #[serde(default = "default_reconnect_attempts")]
    pub laserstream_reconnect_attempts: u32,
    /// Telegram bot token used to deliver notifications.
    pub telegram_bot_token: String,
    /// Wallets seeded into the store, as `address:owner` pairs.
    #[serde(default)]
    pub wallets: Vec<String>,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_price_timeout_ms")]
    pub price_timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Notifications delivered concurrently.
    #[serde(default = "default_delivery_concurrency")]
    pub delivery_concurrency: usize,
    /// Seconds between fallback refetches of the store, 0 disables them.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Emit JSON logs instead of the compact format.
    #[serde(default)]
    pub log_json: bool,
}

impl WatchConfig {
    /// Loads `.env` if present, then reads the `WATCH_*` variables.
    pub fn from_env() -> Result<Self, WatchError> {
        // a missing .env file is not an error
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .map_err(|e| WatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), WatchError> {
        if self.laserstream_endpoint.is_empty() {
            return Err(WatchError::Config("laserstream endpoint is empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(WatchError::Config("max_attempts must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(WatchError::Config("queue_capacity must be at least 1".into()));
        }
        if self.delivery_concurrency == 0 {
            return Err(WatchError::Config("delivery_concurrency must be at least 1".into()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(WatchError::Config(
                "initial_backoff_ms exceeds max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_attempts: self.max_attempts,
            open_timeout: Duration::from_millis(self.open_timeout_ms),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price_timeout_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }

    /// Parses the seeded wallets, rejecting addresses that are not base58
    /// encoded 32 byte keys.
    pub fn initial_wallets(&self) -> Result<Vec<WatchedWallet>, WatchError> {
        self.wallets
            .iter()
            .map(|entry| {
                let (address, owner) = entry
                    .split_once(':')
                    .filter(|(_, owner)| !owner.is_empty())
                    .ok_or_else(|| {
                        WatchError::Config(format!("expected address:owner, got {entry}"))
                    })?;

                let key = bs58::decode(address)
                    .into_vec()
                    .map_err(|e| WatchError::Config(format!("invalid address {address}: {e}")))?;
                if key.len() != 32 {
                    return Err(WatchError::Config(format!("invalid address {address}")));
                }
                Ok(WatchedWallet::new(address, owner))
            })
            .collect()
    }
}

fn default_reconnect_attempts() -> u32 {
    MAX_RECONNECT_ATTEMPTS
}

fn default_initial_backoff_ms() -> u64 {
    INITIAL_BACKOFF.as_millis() as u64
}

fn default_max_backoff_ms() -> u64 {
    MAX_BACKOFF.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    MAX_SUBSCRIBE_ATTEMPTS
}

fn default_open_timeout_ms() -> u64 {
    OPEN_TIMEOUT.as_millis() as u64
}

fn default_close_timeout_ms() -> u64 {
    CLOSE_TIMEOUT.as_millis() as u64
}

fn default_send_timeout_ms() -> u64 {
    SEND_TIMEOUT.as_millis() as u64
}

fn default_price_timeout_ms() -> u64 {
    PRICE_TIMEOUT.as_millis() as u64
}

fn default_queue_capacity() -> usize {
    MAX_PENDING_NOTIFICATIONS
}

fn default_delivery_concurrency() -> usize {
    MAX_CONCURRENT_DELIVERIES
}

fn default_poll_interval_secs() -> u64 {
    FALLBACK_POLL_INTERVAL.as_secs()
}
