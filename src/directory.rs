use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::types::{Address, OwnerId, WatchedWallet};

/// Owners of every watched address, as of the last applied target set.
///
/// Read by the notification path without touching the subscription lock.
#[derive(Debug, Default)]
pub struct WalletDirectory {
    owners: RwLock<HashMap<Address, Vec<OwnerId>>>,
}

impl WalletDirectory {
    /// Owners to notify for `address`, empty if it is not watched.
    pub async fn owners(&self, address: &str) -> Vec<OwnerId> {
        self.owners
            .read()
            .await
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.owners.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.owners.read().await.is_empty()
    }

    pub(crate) async fn replace(&self, owners: HashMap<Address, Vec<OwnerId>>) {
        *self.owners.write().await = owners;
    }

    pub(crate) async fn clear(&self) {
        self.owners.write().await.clear();
    }
}

/// Groups wallets by address, dropping duplicate records while keeping the
/// first-seen owner order.
pub(crate) fn owners_by_address(wallets: &[WatchedWallet]) -> HashMap<Address, Vec<OwnerId>> {
    let mut owners: HashMap<Address, Vec<OwnerId>> = HashMap::new();
    for wallet in wallets {
        let entry = owners.entry(wallet.address.clone()).or_default();
        if !entry.contains(&wallet.owner_id) {
            entry.push(wallet.owner_id.clone());
        }
    }
    owners
}
