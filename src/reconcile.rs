use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::consts::CHANGE_STREAM_RESTART_DELAY;
use crate::manager::SubscriptionManager;
use crate::store::{ChangeEventSource, WalletStore};
use crate::types::{ReconcileSummary, WatchError};

/// Keeps the manager in line with the wallet store.
///
/// Change events are only wake-ups: every refresh refetches the full wallet
/// list, so missed or coalesced events are harmless.
pub struct ReconciliationLoop {
    manager: SubscriptionManager,
    store: Arc<dyn WalletStore>,
    changes: Arc<dyn ChangeEventSource>,
    poll_interval: Option<Duration>,
    restart_delay: Duration,
}

impl ReconciliationLoop {
    pub fn new(
        manager: SubscriptionManager,
        store: Arc<dyn WalletStore>,
        changes: Arc<dyn ChangeEventSource>,
    ) -> Self {
        Self {
            manager,
            store,
            changes,
            poll_interval: None,
            restart_delay: CHANGE_STREAM_RESTART_DELAY,
        }
    }

    /// Also refreshes every `interval` without waiting for a change event.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Spawns the loop; aborting the handle stops it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        // at most one refresh pending; further wake-ups fold into it
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let changes = self.changes.clone();
        let restart_delay = self.restart_delay;

        tokio::select! {
            _ = drain_changes(changes, wake_tx, restart_delay) => {}
            _ = self.refresh_on_wake(wake_rx) => {}
        }
        debug!("reconciliation loop stopped");
    }

    /// Refetches the wallet list and reconciles against it. On a store error
    /// the live subscriptions are left as they are.
    pub async fn refresh(&self) -> Result<ReconcileSummary, WatchError> {
        let wallets = match self.store.list_all().await {
            Ok(wallets) => wallets,
            Err(error) => {
                warn!(%error, "wallet store unavailable, keeping current subscriptions");
                return Err(error);
            }
        };
        self.manager.reconcile(&wallets).await
    }

    async fn refresh_on_wake(&self, mut wake: mpsc::Receiver<()>) {
        let mut poll = self.poll_interval.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                woke = wake.recv() => {
                    if woke.is_none() {
                        return;
                    }
                }
                _ = next_tick(&mut poll) => debug!("fallback poll"),
            }

            if let Err(WatchError::ShutDown) = self.refresh().await {
                return;
            }
        }
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending().await,
    }
}

/// Forwards membership changes as wake-ups, reopening the change stream
/// whenever it ends or fails.
///
/// Every time the stream is opened a refresh is requested as well, since
/// changes made before it was open are never delivered on it.
async fn drain_changes(
    changes: Arc<dyn ChangeEventSource>,
    wake: mpsc::Sender<()>,
    restart_delay: Duration,
) {
    loop {
        let mut stream = changes.stream();
        if !request_refresh(&wake) {
            return;
        }
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) if event.action.triggers_refresh() => {
                    info!(action = ?event.action, wallet = %event.wallet_id, "wallet set changed");
                    if !request_refresh(&wake) {
                        return;
                    }
                }
                Ok(event) => {
                    debug!(action = ?event.action, wallet = %event.wallet_id, "ignoring change event")
                }
                Err(error) => {
                    warn!(%error, "change stream failed");
                    break;
                }
            }
        }

        time::sleep(restart_delay).await;
        debug!("reopening change stream");
    }
}

/// Returns false once the refresh side is gone.
fn request_refresh(wake: &mpsc::Sender<()>) -> bool {
    match wake.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => true,
        Err(TrySendError::Closed(())) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::store::MemoryWalletStore;
    use crate::subscription::RetryPolicy;
    use crate::testing::{wallets, FakeTransport, FlakyStore};
    use crate::types::WatchedWallet;

    const A: &str = "4eADUUa7sumjdV1uJCBCZxCyeDYTbMruVwKNzWAnYZU4";
    const B: &str = "48ry8Bci3B62UNcUVvU2wavwSv9vjKCWEu9bTNmj6JqN";

    async fn setup(
        initial: &[(&str, &str)],
    ) -> (Arc<FakeTransport>, SubscriptionManager, Arc<FlakyStore>) {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _notifications) =
            SubscriptionManager::new(transport.clone(), RetryPolicy::default(), 16);
        let store = Arc::new(FlakyStore::new(MemoryWalletStore::new(wallets(initial))));
        manager.watch(&store.inner.list_all().await.unwrap()).await.unwrap();
        (transport, manager, store)
    }

    fn reconciler(manager: &SubscriptionManager, store: &Arc<FlakyStore>) -> ReconciliationLoop {
        let changes = Arc::new(ChangeForwarder(store.clone()));
        ReconciliationLoop::new(manager.clone(), store.clone(), changes)
            .with_restart_delay(Duration::from_millis(10))
    }

    struct ChangeForwarder(Arc<FlakyStore>);

    impl ChangeEventSource for ChangeForwarder {
        fn stream(&self) -> crate::store::ChangeStream {
            self.0.inner.stream()
        }
    }

    async fn wait_for_live(manager: &SubscriptionManager, expected: &[&str]) {
        let expected: BTreeSet<String> = expected.iter().map(|a| a.to_string()).collect();
        for _ in 0..100 {
            if manager.live_addresses() == expected {
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!("live set never became {expected:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn create_and_delete_events_reconcile() {
        let (_transport, manager, store) = setup(&[(A, "alice")]).await;
        let handle = reconciler(&manager, &store).spawn();
        time::sleep(Duration::from_millis(1)).await;

        store.inner.add(WatchedWallet::new(B, "bob")).await;
        wait_for_live(&manager, &[A, B]).await;

        store.inner.remove(&WatchedWallet::new(A, "alice")).await;
        wait_for_live(&manager, &[B]).await;

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn changes_before_the_loop_starts_are_picked_up() {
        let (_transport, manager, store) = setup(&[(A, "alice")]).await;

        store.inner.add(WatchedWallet::new(B, "bob")).await;
        let handle = reconciler(&manager, &store).spawn();

        wait_for_live(&manager, &[A, B]).await;
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn other_events_do_not_refetch() {
        let (transport, manager, store) = setup(&[(A, "alice")]).await;
        let handle = reconciler(&manager, &store).spawn();
        time::sleep(Duration::from_millis(1)).await;

        let lists = store.lists();
        store.inner.touch(&WatchedWallet::new(A, "alice"));
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.lists(), lists);
        assert_eq!(transport.total_opens(), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn store_outage_keeps_previous_subscriptions() {
        let (transport, manager, store) = setup(&[(A, "alice"), (B, "bob")]).await;
        let reconciler = reconciler(&manager, &store);

        store.set_offline(true);
        assert!(matches!(
            reconciler.refresh().await,
            Err(WatchError::StoreUnavailable(_))
        ));

        assert_eq!(manager.live_addresses().len(), 2);
        assert!(!transport.is_released(A));
        assert!(!transport.is_released(B));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_poll_picks_up_silent_changes() {
        let (_transport, manager, store) = setup(&[(A, "alice")]).await;
        let handle = reconciler(&manager, &store)
            .with_poll_interval(Duration::from_secs(60))
            .spawn();
        time::sleep(Duration::from_millis(1)).await;

        // the delete event arrives while the store cannot be read
        store.set_offline(true);
        store.inner.remove(&WatchedWallet::new(A, "alice")).await;
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.live_addresses().len(), 1);

        store.set_offline(false);
        time::sleep(Duration::from_secs(61)).await;
        assert!(manager.live_addresses().is_empty());

        handle.abort();
    }
}
