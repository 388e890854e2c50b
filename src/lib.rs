//! Live transaction notifications for a runtime-managed set of Solana wallets.
//!
//! Every watched address gets its own Laserstream subscription running in a
//! separate task. The [`SubscriptionManager`] keeps that set equal to the
//! wallet store: a [`ReconciliationLoop`] refetches the store whenever a
//! wallet is created or deleted and applies only the difference, so
//! unaffected subscriptions are never reopened. Transactions flow through a
//! shared queue to the [`TransactionEventHandler`], which formats amounts and
//! prices and notifies every owner of the wallet.

pub mod config;
pub mod connect;
mod consts;
pub mod directory;
pub mod format;
pub mod handler;
pub mod manager;
pub mod price;
pub mod reconcile;
pub mod sink;
pub mod store;
mod subscription;
pub mod telemetry;
pub mod transfers;
pub mod transport;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::WatchConfig;
pub use connect::LaserstreamTransport;
pub use directory::WalletDirectory;
pub use handler::TransactionEventHandler;
pub use manager::SubscriptionManager;
pub use price::{DexScreenerPrices, PriceSource, TokenQuote};
pub use reconcile::ReconciliationLoop;
pub use sink::{NotificationSink, TelegramSink};
pub use store::{ChangeEventSource, ChangeStream, MemoryWalletStore, WalletStore};
pub use subscription::RetryPolicy;
pub use transport::{SubscriptionTransport, TransactionStream};
pub use types::{
    Address, ChangeAction, ChangeEvent, CloseReason, OwnerId, ReconcileSummary,
    SubscriptionState, TransactionNotification, TransferDirection, WatchError, WatchedWallet,
};
pub use watcher::WalletWatcher;
