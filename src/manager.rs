use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::directory::{owners_by_address, WalletDirectory};
use crate::subscription::{RetryPolicy, Subscription, SubscriptionExit, SubscriptionSinks};
use crate::transport::SubscriptionTransport;
use crate::types::{
    Address, ReconcileSummary, SubscriptionState, TransactionNotification, WatchError,
    WatchedWallet,
};

/// Owns the live per-wallet subscriptions.
///
/// `watch`, `reconcile`, `shutdown` and the removal of subscriptions that ran
/// out of retries all go through one async mutex, so changes to the live set
/// never interleave. Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

/// Per-address state receivers, republished whenever the live set changes.
type LiveSnapshot = HashMap<Address, watch::Receiver<SubscriptionState>>;

struct Inner {
    transport: Arc<dyn SubscriptionTransport>,
    policy: RetryPolicy,
    live: Mutex<LiveSet>,
    snapshot: watch::Sender<LiveSnapshot>,
    directory: Arc<WalletDirectory>,
    sinks: SubscriptionSinks,
    next_id: AtomicU64,
}

#[derive(Default)]
struct LiveSet {
    subscriptions: HashMap<Address, Subscription>,
    shut_down: bool,
}

impl SubscriptionManager {
    /// Creates an idle manager and the queue its subscriptions feed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        transport: Arc<dyn SubscriptionTransport>,
        policy: RetryPolicy,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<TransactionNotification>) {
        let (notifications_tx, notifications_rx) = mpsc::channel(queue_capacity);
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            transport,
            policy,
            live: Mutex::new(LiveSet::default()),
            snapshot: watch::channel(LiveSnapshot::new()).0,
            directory: Arc::default(),
            sinks: SubscriptionSinks {
                notifications: notifications_tx,
                exits: exits_tx,
            },
            next_id: AtomicU64::new(0),
        });
        tokio::spawn(reap_exhausted(Arc::downgrade(&inner), exits_rx));

        (Self { inner }, notifications_rx)
    }

    /// Owners of the watched addresses, shared with the notification path.
    pub fn directory(&self) -> Arc<WalletDirectory> {
        self.inner.directory.clone()
    }

    /// Cold start: checks the streaming endpoint, then subscribes to every
    /// address in `wallets`.
    ///
    /// Only a failed endpoint check is returned as an error. Addresses that
    /// fail to open keep retrying in the background.
    pub async fn watch(&self, wallets: &[WatchedWallet]) -> Result<ReconcileSummary, WatchError> {
        let mut live = self.inner.live.lock().await;
        if live.shut_down {
            return Err(WatchError::ShutDown);
        }

        self.inner.transport.health_check().await?;
        let summary = self.apply(&mut live, wallets).await;
        info!(subscriptions = live.subscriptions.len(), "watching wallets");
        Ok(summary)
    }

    /// Converges the live subscriptions to the addresses in `wallets`.
    ///
    /// Addresses present before and after are left untouched.
    pub async fn reconcile(
        &self,
        wallets: &[WatchedWallet],
    ) -> Result<ReconcileSummary, WatchError> {
        let mut live = self.inner.live.lock().await;
        if live.shut_down {
            return Err(WatchError::ShutDown);
        }

        let summary = self.apply(&mut live, wallets).await;
        info!(
            opened = summary.opened,
            closed = summary.closed,
            unchanged = summary.unchanged,
            "reconciled wallet subscriptions"
        );
        Ok(summary)
    }

    /// Closes every live subscription. Later calls are no-ops.
    pub async fn shutdown(&self) {
        let mut live = self.inner.live.lock().await;
        if live.shut_down {
            return;
        }
        live.shut_down = true;

        let closing: Vec<_> = live
            .subscriptions
            .drain()
            .map(|(_, subscription)| subscription.close())
            .collect();
        let closed = closing.len();
        self.inner.publish(&live);
        join_all(closing).await;
        self.inner.directory.clear().await;
        info!(closed, "subscription manager shut down");
    }

    /// Addresses with a live subscription.
    ///
    /// Reads the last published snapshot and never waits for a reconcile
    /// in progress.
    pub fn live_addresses(&self) -> BTreeSet<Address> {
        self.inner.snapshot.borrow().keys().cloned().collect()
    }

    pub fn state(&self, address: &str) -> Option<SubscriptionState> {
        let snapshot = self.inner.snapshot.borrow();
        snapshot.get(address).map(|state| state.borrow().clone())
    }

    /// Follows the state of a live subscription.
    pub fn watch_state(&self, address: &str) -> Option<watch::Receiver<SubscriptionState>> {
        self.inner.snapshot.borrow().get(address).cloned()
    }

    async fn apply(&self, live: &mut LiveSet, wallets: &[WatchedWallet]) -> ReconcileSummary {
        let wanted = owners_by_address(wallets);

        // Subscriptions that gave up are recreated below if still wanted.
        live.subscriptions.retain(|_, subscription| !subscription.state().is_closed());

        let to_remove: Vec<Address> = live
            .subscriptions
            .keys()
            .filter(|address| !wanted.contains_key(*address))
            .cloned()
            .collect();
        let to_add: Vec<Address> = wanted
            .keys()
            .filter(|address| !live.subscriptions.contains_key(*address))
            .cloned()
            .collect();

        let closing: Vec<_> = to_remove
            .iter()
            .filter_map(|address| live.subscriptions.remove(address))
            .map(Subscription::close)
            .collect();
        join_all(closing).await;

        self.inner.directory.replace(wanted).await;

        let mut first_attempts = Vec::with_capacity(to_add.len());
        for address in &to_add {
            debug!(%address, "opening subscription");
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let (subscription, first_attempt) = Subscription::spawn(
                address.clone(),
                id,
                self.inner.transport.clone(),
                self.inner.policy.clone(),
                self.inner.sinks.clone(),
            );
            live.subscriptions.insert(address.clone(), subscription);
            first_attempts.push(first_attempt);
        }
        self.inner.publish(live);
        join_all(first_attempts).await;

        for address in &to_add {
            let pending = live
                .subscriptions
                .get(address)
                .is_some_and(|subscription| subscription.state() == SubscriptionState::Pending);
            if pending {
                warn!(%address, "subscription not active yet, retrying in background");
            }
        }

        ReconcileSummary {
            opened: to_add.len(),
            closed: to_remove.len(),
            unchanged: live.subscriptions.len() - to_add.len(),
        }
    }
}

impl Inner {
    fn publish(&self, live: &LiveSet) {
        let snapshot = live
            .subscriptions
            .iter()
            .map(|(address, subscription)| (address.clone(), subscription.watch_state()))
            .collect();
        self.snapshot.send_replace(snapshot);
    }
}

/// Drops subscriptions that exhausted their retries from the live set.
async fn reap_exhausted(inner: Weak<Inner>, mut exits: mpsc::UnboundedReceiver<SubscriptionExit>) {
    while let Some(exit) = exits.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        let mut live = inner.live.lock().await;

        // the address may have been closed or reopened in the meantime
        if live
            .subscriptions
            .get(&exit.address)
            .is_some_and(|subscription| subscription.id() == exit.id)
        {
            live.subscriptions.remove(&exit.address);
            inner.publish(&live);
            warn!(address = %exit.address, error = %exit.error, "dropped wallet subscription");
        }
    }
}
