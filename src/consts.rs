//! Constants used throughout the wallet watch service.

use std::time::Duration;

/// Maximum pending transaction notifications between subscriptions and the handler.
pub(crate) const MAX_PENDING_NOTIFICATIONS: usize = 8192;

/// Notifications rendered and delivered at the same time by the handler.
pub(crate) const MAX_CONCURRENT_DELIVERIES: usize = 32;

/// Maximum reconnection attempts made internally by the Laserstream client.
pub(crate) const MAX_RECONNECT_ATTEMPTS: u32 = 16;

/// Time allowed for a new Laserstream connection to deliver its first update.
pub(crate) const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// First delay before a failed subscription is reopened.
pub(crate) const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Ceiling for the exponential reconnect backoff.
pub(crate) const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Consecutive failures after which a subscription is dropped from the live set.
pub(crate) const MAX_SUBSCRIBE_ATTEMPTS: u32 = 8;

/// Budget for a single subscription open attempt.
pub(crate) const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for a subscription task to release its stream after a close request.
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Budget for one outbound notification.
pub(crate) const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for one price lookup.
pub(crate) const PRICE_TIMEOUT: Duration = Duration::from_secs(3);

/// Delay before a terminated change stream is reopened.
pub(crate) const CHANGE_STREAM_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Fallback interval for refetching the wallet store without a change event.
pub(crate) const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Name of the transaction filter sent with every wallet subscription.
pub(crate) const WALLET_FILTER: &str = "wallet";

/// Explorer prefix used for transaction links.
pub(crate) const SOLSCAN_TX_URL: &str = "https://solscan.io/tx/";
