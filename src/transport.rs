use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::types::{Address, TransactionNotification, WatchError};

/// Stream of token transfers observed on one wallet.
///
/// An `Err` item or the end of the stream means the connection was lost.
pub type TransactionStream =
    Pin<Box<dyn Stream<Item = Result<TransactionNotification, WatchError>> + Send>>;

/// Source of live per-wallet transaction streams.
#[async_trait]
pub trait SubscriptionTransport: Send + Sync + 'static {
    /// Checks that the streaming endpoint is reachable at all.
    async fn health_check(&self) -> Result<(), WatchError>;

    /// Opens a live stream for a single wallet. Dropping the stream releases
    /// the underlying connection.
    async fn open(&self, address: &Address) -> Result<TransactionStream, WatchError>;
}
