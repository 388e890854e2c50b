use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::WatchConfig;
use crate::handler::TransactionEventHandler;
use crate::manager::SubscriptionManager;
use crate::price::PriceSource;
use crate::reconcile::ReconciliationLoop;
use crate::sink::NotificationSink;
use crate::store::{ChangeEventSource, WalletStore};
use crate::transport::SubscriptionTransport;
use crate::types::WatchError;

/// The running wallet watch service.
pub struct WalletWatcher {
    manager: SubscriptionManager,
    handler: JoinHandle<()>,
    reconciler: JoinHandle<()>,
}

impl WalletWatcher {
    /// Starts watching every wallet in `store` and keeps following its changes.
    ///
    /// Fails if the store cannot be listed or the streaming endpoint is
    /// unreachable. Once started, failures are handled in the background.
    pub async fn start(
        config: &WatchConfig,
        transport: Arc<dyn SubscriptionTransport>,
        store: Arc<dyn WalletStore>,
        changes: Arc<dyn ChangeEventSource>,
        prices: Arc<dyn PriceSource>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, WatchError> {
        let (manager, notifications) =
            SubscriptionManager::new(transport, config.retry_policy(), config.queue_capacity);

        let wallets = store.list_all().await?;
        manager.watch(&wallets).await?;

        let handler = TransactionEventHandler::new(manager.directory(), prices, sink)
            .with_timeouts(config.price_timeout(), config.send_timeout())
            .with_concurrency(config.delivery_concurrency);
        let handler = tokio::spawn(handler.run(notifications));

        let mut reconciler = ReconciliationLoop::new(manager.clone(), store, changes);
        if let Some(interval) = config.poll_interval() {
            reconciler = reconciler.with_poll_interval(interval);
        }
        let reconciler = reconciler.spawn();

        info!(wallets = wallets.len(), "wallet watcher started");
        Ok(Self {
            manager,
            handler,
            reconciler,
        })
    }

    pub fn manager(&self) -> &SubscriptionManager {
        &self.manager
    }

    /// Stops following the store and closes every subscription.
    pub async fn stop(self) {
        self.reconciler.abort();
        self.manager.shutdown().await;
        self.handler.abort();
        info!("wallet watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use tokio::time;

    use super::*;
    use crate::config::tests::vars;
    use crate::price::TokenQuote;
    use crate::store::MemoryWalletStore;
    use crate::testing::{notification, wallets, FakePrices, FakeTransport, RecordingSink};
    use crate::types::WatchedWallet;

    const A: &str = "4eADUUa7sumjdV1uJCBCZxCyeDYTbMruVwKNzWAnYZU4";
    const B: &str = "48ry8Bci3B62UNcUVvU2wavwSv9vjKCWEu9bTNmj6JqN";
    const MINT: &str = "So11111111111111111111111111111111111111112";

    #[tokio::test(start_paused = true)]
    async fn end_to_end_notification_and_membership_change() {
        let config = WatchConfig::from_vars(vars(&[])).unwrap();
        let transport = Arc::new(FakeTransport::default());
        let store = Arc::new(MemoryWalletStore::new(wallets(&[(A, "1001")])));
        let sink = Arc::new(RecordingSink::default());
        let prices = Arc::new(FakePrices::with_quote(
            MINT,
            TokenQuote {
                price_usd: 2.0,
                market_cap_usd: None,
            },
        ));

        let watcher = WalletWatcher::start(
            &config,
            transport.clone(),
            store.clone(),
            store.clone(),
            prices,
            sink.clone(),
        )
        .await
        .unwrap();
        time::sleep(Duration::from_millis(1)).await;

        transport.push(A, notification(A, 5_000_000)).await;
        time::sleep(Duration::from_millis(10)).await;
        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "1001");
        assert!(messages[0].1.contains("Value: $10.00"));

        store.add(WatchedWallet::new(B, "1002")).await;
        time::sleep(Duration::from_millis(100)).await;
        let expected: BTreeSet<String> = [A, B].iter().map(|a| a.to_string()).collect();
        assert_eq!(watcher.manager().live_addresses(), expected);

        watcher.stop().await;
        assert!(transport.is_released(A));
        assert!(transport.is_released(B));
    }

    #[tokio::test(start_paused = true)]
    async fn wallet_added_right_after_start_is_watched() {
        let config =
            WatchConfig::from_vars(vars(&[("WATCH_POLL_INTERVAL_SECS", "0")])).unwrap();
        let transport = Arc::new(FakeTransport::default());
        let store = Arc::new(MemoryWalletStore::new(wallets(&[(A, "1001")])));

        let watcher = WalletWatcher::start(
            &config,
            transport,
            store.clone(),
            store.clone(),
            Arc::new(FakePrices::default()),
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap();
        store.add(WatchedWallet::new(B, "1002")).await;
        time::sleep(Duration::from_secs(10)).await;

        let expected: BTreeSet<String> = [A, B].iter().map(|a| a.to_string()).collect();
        assert_eq!(watcher.manager().live_addresses(), expected);
        watcher.stop().await;
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_start() {
        let config = WatchConfig::from_vars(vars(&[])).unwrap();
        let transport = Arc::new(FakeTransport::default());
        transport.set_unreachable(true);
        let store = Arc::new(MemoryWalletStore::new(wallets(&[(A, "1001")])));

        let result = WalletWatcher::start(
            &config,
            transport,
            store.clone(),
            store,
            Arc::new(FakePrices::default()),
            Arc::new(RecordingSink::default()),
        )
        .await;

        assert!(matches!(result, Err(WatchError::Connection(_))));
    }
}
