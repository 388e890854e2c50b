use std::sync::Arc;
use std::time::Duration;

use futures::{future::join_all, StreamExt};
use tokio::{sync::mpsc, time};
use tracing::{debug, warn};

use crate::consts::{MAX_CONCURRENT_DELIVERIES, PRICE_TIMEOUT, SEND_TIMEOUT, SOLSCAN_TX_URL};
use crate::directory::WalletDirectory;
use crate::format::{format_price, format_token_amount, format_token_price, scale_token_amount};
use crate::price::{PriceSource, TokenQuote};
use crate::sink::NotificationSink;
use crate::types::{OwnerId, TransactionNotification, TransferDirection};

/// Turns transaction notifications into one message per wallet owner.
///
/// Delivery is at-most-once: a duplicate notification from the transport
/// produces a duplicate message.
pub struct TransactionEventHandler {
    directory: Arc<WalletDirectory>,
    prices: Arc<dyn PriceSource>,
    sink: Arc<dyn NotificationSink>,
    price_timeout: Duration,
    send_timeout: Duration,
    concurrency: usize,
}

impl TransactionEventHandler {
    pub fn new(
        directory: Arc<WalletDirectory>,
        prices: Arc<dyn PriceSource>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            directory,
            prices,
            sink,
            price_timeout: PRICE_TIMEOUT,
            send_timeout: SEND_TIMEOUT,
            concurrency: MAX_CONCURRENT_DELIVERIES,
        }
    }

    pub fn with_timeouts(mut self, price_timeout: Duration, send_timeout: Duration) -> Self {
        self.price_timeout = price_timeout;
        self.send_timeout = send_timeout;
        self
    }

    /// Notifications handled at the same time; a slow owner only holds up
    /// its own slot.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Drains the notification queue until every sender is gone.
    pub async fn run(self, notifications: mpsc::Receiver<TransactionNotification>) {
        let queue = futures::stream::unfold(notifications, |mut notifications| async move {
            notifications.recv().await.map(|n| (n, notifications))
        });
        let handler = &self;
        queue
            .for_each_concurrent(self.concurrency, |notification| async move {
                handler.on_notification(notification).await;
            })
            .await;
        debug!("notification queue closed");
    }

    /// Notifies every owner of the wallet. Returns the number of messages delivered.
    pub async fn on_notification(&self, notification: TransactionNotification) -> usize {
        let owners = self.directory.owners(&notification.address).await;
        if owners.is_empty() {
            debug!(address = %notification.address, "no owners for wallet, dropping notification");
            return 0;
        }

        let quote = self.quote(&notification.token_mint).await;
        let message = render_message(&notification, quote.as_ref());

        let deliveries = owners.iter().map(|owner| self.deliver(owner, &message));
        join_all(deliveries).await.into_iter().filter(|delivered| *delivered).count()
    }

    async fn quote(&self, mint: &str) -> Option<TokenQuote> {
        match time::timeout(self.price_timeout, self.prices.quote(mint)).await {
            Ok(Ok(quote)) => Some(quote),
            Ok(Err(error)) => {
                warn!(%mint, %error, "price lookup failed, sending amount only");
                None
            }
            Err(_) => {
                warn!(%mint, "price lookup timed out, sending amount only");
                None
            }
        }
    }

    async fn deliver(&self, owner: &OwnerId, message: &str) -> bool {
        match time::timeout(self.send_timeout, self.sink.send(owner, message)).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                warn!(%owner, %error, "dropping notification");
                false
            }
            Err(_) => {
                warn!(%owner, "notification send timed out, dropping");
                false
            }
        }
    }
}

/// Renders the message sent to owners, with price lines only when a quote is known.
pub fn render_message(
    notification: &TransactionNotification,
    quote: Option<&TokenQuote>,
) -> String {
    let verb = match notification.direction {
        TransferDirection::Received => "received",
        TransferDirection::Sent => "sent",
    };

    let mut lines = vec![format!(
        "Wallet {} {verb} {} of {}",
        notification.address,
        format_token_amount(notification.raw_amount),
        notification.token_mint,
    )];

    if let Some(quote) = quote {
        let value = scale_token_amount(notification.raw_amount) * quote.price_usd;
        lines.push(format!("Price: ${}", format_token_price(quote.price_usd)));
        lines.push(format!("Value: ${}", format_price(value)));
        if let Some(market_cap) = quote.market_cap_usd {
            lines.push(format!("Market cap: ${}", format_price(market_cap)));
        }
    }

    lines.push(format!("{SOLSCAN_TX_URL}{}", notification.signature));
    lines.join("\n")
}
