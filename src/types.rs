use helius_laserstream::LaserstreamError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base58 encoded Solana wallet address.
pub type Address = String;

/// Identity of the user owning a watched wallet (the bot chat id).
pub type OwnerId = String;

/// Solana slot number.
pub type Slot = u64;

/// A wallet tracked on behalf of one owner.
///
/// The same address may be watched by several owners, it is still
/// subscribed to only once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchedWallet {
    pub address: Address,
    pub owner_id: OwnerId,
}

impl WatchedWallet {
    pub fn new(address: impl Into<Address>, owner_id: impl Into<OwnerId>) -> Self {
        Self {
            address: address.into(),
            owner_id: owner_id.into(),
        }
    }
}

/// Errors that can occur while watching wallets.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Connection-related error.
    #[error("connection error: {0}")]
    Connection(&'static str),
    /// Laserstream error.
    #[error("laserstream error: {0}")]
    LaserStream(#[from] LaserstreamError),
    /// Transport failure reported by a subscription backend.
    #[error("transport error: {0}")]
    Transport(String),
    /// An operation exceeded its time budget.
    #[error("{0} timed out")]
    Timeout(&'static str),
    /// The wallet store or its change stream could not be reached.
    #[error("wallet store unavailable: {0}")]
    StoreUnavailable(String),
    /// An outbound notification could not be delivered.
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// Price lookup failed.
    #[error("price lookup failed: {0}")]
    Price(String),
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The subscription manager was shut down.
    #[error("subscription manager is shut down")]
    ShutDown,
}

/// Lifecycle of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Opening, or waiting to reconnect after a failure.
    Pending,
    /// Connected and forwarding transactions.
    Active,
    /// Close requested, waiting for the task to release its stream.
    Closing,
    /// Terminated.
    Closed(CloseReason),
}

impl SubscriptionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Why a subscription reached [`SubscriptionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Removed by a reconciliation or a shutdown.
    Requested,
    /// Gave up after exhausting its retries; carries the last error.
    Failed(String),
}

/// Direction of a token transfer relative to the watched wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Received,
    Sent,
}

/// A token balance change observed on a watched wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionNotification {
    /// The watched wallet.
    pub address: Address,
    /// Absolute change in base units.
    pub raw_amount: u64,
    /// Mint of the transferred token.
    pub token_mint: String,
    /// Base58 transaction signature.
    pub signature: String,
    pub direction: TransferDirection,
    pub slot: Slot,
}

/// Kind of mutation reported by the wallet change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Create,
    Delete,
    Other,
}

impl ChangeAction {
    /// Only membership changes require the target set to be refetched.
    pub fn triggers_refresh(self) -> bool {
        matches!(self, Self::Create | Self::Delete)
    }
}

/// Wake-up signal from the wallet store. It names the affected record but
/// the store stays the source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub wallet_id: String,
}

/// Outcome of applying a target set to the live subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub opened: usize,
    pub closed: usize,
    pub unchanged: usize,
}
