use std::sync::Arc;

use tracing::info;
use wallet_watch::{
    telemetry, DexScreenerPrices, LaserstreamTransport, MemoryWalletStore, TelegramSink,
    WalletWatcher, WatchConfig, WatchError,
};

#[tokio::main]
async fn main() -> Result<(), WatchError> {
    let config = WatchConfig::from_env()?;
    telemetry::init_tracing(config.log_json);

    let store = Arc::new(MemoryWalletStore::new(config.initial_wallets()?));
    let watcher = WalletWatcher::start(
        &config,
        Arc::new(LaserstreamTransport::new(&config)),
        store.clone(),
        store,
        Arc::new(DexScreenerPrices::new()),
        Arc::new(TelegramSink::new(&config.telegram_bot_token)),
    )
    .await?;

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
    watcher.stop().await;
    Ok(())
}
