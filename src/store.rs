use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{broadcast, RwLock};

use crate::types::{ChangeAction, ChangeEvent, WatchError, WatchedWallet};

/// Stream of wallet membership changes. It may end or fail; consumers
/// reopen it through [`ChangeEventSource::stream`].
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, WatchError>> + Send>>;

/// Authoritative wallet membership.
#[async_trait]
pub trait WalletStore: Send + Sync + 'static {
    async fn list_all(&self) -> Result<Vec<WatchedWallet>, WatchError>;
}

/// Notifies about mutations of the wallet store.
pub trait ChangeEventSource: Send + Sync + 'static {
    fn stream(&self) -> ChangeStream;
}

/// Capacity of the change broadcast; slower consumers observe a lag error.
const CHANGE_BUFFER: usize = 64;

/// Wallet store kept in memory, broadcasting a change event on every mutation.
pub struct MemoryWalletStore {
    wallets: RwLock<Vec<WatchedWallet>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryWalletStore {
    pub fn new(wallets: Vec<WatchedWallet>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            wallets: RwLock::new(wallets),
            changes,
        }
    }

    /// Adds a wallet record. Returns false if the record already exists.
    pub async fn add(&self, wallet: WatchedWallet) -> bool {
        let mut wallets = self.wallets.write().await;
        if wallets.contains(&wallet) {
            return false;
        }
        let event = ChangeEvent {
            action: ChangeAction::Create,
            wallet_id: wallet_id(&wallet),
        };
        wallets.push(wallet);
        drop(wallets);

        // nobody listening is fine
        let _ = self.changes.send(event);
        true
    }

    /// Removes a wallet record. Returns false if it was not present.
    pub async fn remove(&self, wallet: &WatchedWallet) -> bool {
        let mut wallets = self.wallets.write().await;
        let before = wallets.len();
        wallets.retain(|w| w != wallet);
        if wallets.len() == before {
            return false;
        }
        drop(wallets);

        let _ = self.changes.send(ChangeEvent {
            action: ChangeAction::Delete,
            wallet_id: wallet_id(wallet),
        });
        true
    }

    /// Publishes a non-membership change, such as a renamed wallet.
    pub fn touch(&self, wallet: &WatchedWallet) {
        let _ = self.changes.send(ChangeEvent {
            action: ChangeAction::Other,
            wallet_id: wallet_id(wallet),
        });
    }
}

fn wallet_id(wallet: &WatchedWallet) -> String {
    format!("{}:{}", wallet.owner_id, wallet.address)
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn list_all(&self) -> Result<Vec<WatchedWallet>, WatchError> {
        Ok(self.wallets.read().await.clone())
    }
}

impl ChangeEventSource for MemoryWalletStore {
    fn stream(&self) -> ChangeStream {
        let receiver = self.changes.subscribe();
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            let item = match receiver.recv().await {
                Ok(event) => Ok(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => Err(
                    WatchError::StoreUnavailable(format!("change stream lagged by {missed} events")),
                ),
                Err(broadcast::error::RecvError::Closed) => return None,
            };
            Some((item, receiver))
        });
        Box::pin(stream)
    }
}
