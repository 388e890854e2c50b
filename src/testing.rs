//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::price::{PriceSource, TokenQuote};
use crate::sink::NotificationSink;
use crate::store::{MemoryWalletStore, WalletStore};
use crate::transport::{SubscriptionTransport, TransactionStream};
use crate::types::{
    Address, OwnerId, TransactionNotification, TransferDirection, WatchError, WatchedWallet,
};

type Feed = mpsc::Sender<Result<TransactionNotification, WatchError>>;

pub(crate) fn notification(address: &str, raw_amount: u64) -> TransactionNotification {
    TransactionNotification {
        address: address.into(),
        raw_amount,
        token_mint: "So11111111111111111111111111111111111111112".into(),
        signature: "5h6xBEauJ3PK6SWCZ1PGjBvj8vDdWG3KpwATGy1ARAXF".into(),
        direction: TransferDirection::Received,
        slot: 1,
    }
}

pub(crate) fn wallets(entries: &[(&str, &str)]) -> Vec<WatchedWallet> {
    entries
        .iter()
        .map(|(address, owner)| WatchedWallet::new(*address, *owner))
        .collect()
}

/// Transport whose streams are fed by the test.
#[derive(Default)]
pub(crate) struct FakeTransport {
    unreachable: AtomicBool,
    failing: Mutex<HashSet<Address>>,
    stalled: Mutex<HashSet<Address>>,
    opens: Mutex<HashMap<Address, usize>>,
    feeds: Mutex<HashMap<Address, Feed>>,
}

impl FakeTransport {
    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub(crate) fn fail(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.into());
    }

    /// Makes open attempts for `address` hang until they time out.
    pub(crate) fn stall(&self, address: &str) {
        self.stalled.lock().unwrap().insert(address.into());
    }

    pub(crate) fn recover(&self, address: &str) {
        self.failing.lock().unwrap().remove(address);
    }

    pub(crate) fn opens(&self, address: &str) -> usize {
        self.opens.lock().unwrap().get(address).copied().unwrap_or_default()
    }

    pub(crate) fn total_opens(&self) -> usize {
        self.opens.lock().unwrap().values().sum()
    }

    /// Ends the current stream of `address`.
    pub(crate) fn disconnect(&self, address: &str) {
        self.feeds.lock().unwrap().remove(address);
    }

    /// True once the consumer dropped the stream of `address`.
    pub(crate) fn is_released(&self, address: &str) -> bool {
        self.feeds
            .lock()
            .unwrap()
            .get(address)
            .map_or(true, |feed| feed.is_closed())
    }

    pub(crate) async fn push(&self, address: &str, notification: TransactionNotification) {
        let feed = self.feeds.lock().unwrap().get(address).cloned().unwrap();
        feed.send(Ok(notification)).await.unwrap();
    }
}

#[async_trait]
impl SubscriptionTransport for FakeTransport {
    async fn health_check(&self) -> Result<(), WatchError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(WatchError::Connection("endpoint unreachable"));
        }
        Ok(())
    }

    async fn open(&self, address: &Address) -> Result<TransactionStream, WatchError> {
        *self.opens.lock().unwrap().entry(address.clone()).or_default() += 1;
        let stalled = self.stalled.lock().unwrap().contains(address);
        if stalled {
            futures::future::pending::<()>().await;
        }
        if self.failing.lock().unwrap().contains(address) {
            return Err(WatchError::Transport(format!("refused {address}")));
        }

        let (feed, rx) = mpsc::channel(16);
        self.feeds.lock().unwrap().insert(address.clone(), feed);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

/// Store that can be switched offline.
pub(crate) struct FlakyStore {
    pub(crate) inner: MemoryWalletStore,
    offline: AtomicBool,
    lists: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new(inner: MemoryWalletStore) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
            lists: AtomicUsize::new(0),
        }
    }

    /// Number of `list_all` calls so far.
    pub(crate) fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletStore for FlakyStore {
    async fn list_all(&self) -> Result<Vec<WatchedWallet>, WatchError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(WatchError::StoreUnavailable("offline".into()));
        }
        self.inner.list_all().await
    }
}

#[derive(Default)]
pub(crate) struct FakePrices {
    quotes: Mutex<HashMap<String, TokenQuote>>,
}

impl FakePrices {
    pub(crate) fn with_quote(mint: &str, quote: TokenQuote) -> Self {
        let prices = Self::default();
        prices.quotes.lock().unwrap().insert(mint.into(), quote);
        prices
    }
}

#[async_trait]
impl PriceSource for FakePrices {
    async fn quote(&self, mint: &str) -> Result<TokenQuote, WatchError> {
        self.quotes
            .lock()
            .unwrap()
            .get(mint)
            .cloned()
            .ok_or_else(|| WatchError::Price(format!("no pairs for {mint}")))
    }
}

/// Sink recording every delivered message.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) sent: Mutex<Vec<(OwnerId, String)>>,
    rejecting: Mutex<HashSet<OwnerId>>,
    stalling: Mutex<HashSet<OwnerId>>,
}

impl RecordingSink {
    pub(crate) fn reject(&self, owner: &str) {
        self.rejecting.lock().unwrap().insert(owner.into());
    }

    /// Makes sends to `owner` hang until they time out.
    pub(crate) fn stall(&self, owner: &str) {
        self.stalling.lock().unwrap().insert(owner.into());
    }

    pub(crate) fn messages(&self) -> Vec<(OwnerId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, owner_id: &OwnerId, message: &str) -> Result<(), WatchError> {
        let stalled = self.stalling.lock().unwrap().contains(owner_id);
        if stalled {
            futures::future::pending::<()>().await;
        }
        if self.rejecting.lock().unwrap().contains(owner_id) {
            return Err(WatchError::Delivery(format!("chat {owner_id} blocked the bot")));
        }
        self.sent
            .lock()
            .unwrap()
            .push((owner_id.clone(), message.to_owned()));
        Ok(())
    }
}

