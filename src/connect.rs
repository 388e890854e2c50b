use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::StreamExt;
use helius_laserstream::{
    client,
    grpc::{
        subscribe_update::UpdateOneof, CommitmentLevel, SubscribeRequest, SubscribeRequestPing,
        SubscribeUpdate,
    },
    LaserstreamConfig, LaserstreamError,
};
use tokio::time;

use crate::config::WatchConfig;
use crate::consts::HEALTH_CHECK_TIMEOUT;
use crate::transfers;
use crate::transport::{SubscriptionTransport, TransactionStream};
use crate::types::{Address, WatchError};

/// Stream type alias for Laserstream updates.
pub type LaserStream =
    Pin<Box<dyn futures::Stream<Item = Result<SubscribeUpdate, LaserstreamError>> + Send>>;

/// Establishes a connection to Laserstream and performs health check.
///
/// Takes a config and subscription request, sends a ping to establish the connection,
/// and waits for the first update to make sure the stream is working.
pub async fn connect(
    config: &LaserstreamConfig,
    request: SubscribeRequest,
) -> Result<LaserStream, WatchError> {
    let (stream, handle) = client::subscribe(config.clone(), request);
    let mut stream = Box::pin(stream);

    // Send ping to establish connection
    handle
        .write(SubscribeRequest {
            ping: Some(SubscribeRequestPing { id: 0 }),
            ..Default::default()
        })
        .await
        .map_err(WatchError::LaserStream)?;

    time::timeout(HEALTH_CHECK_TIMEOUT, stream.next())
        .await
        .map_err(|_| WatchError::Connection("health check timed out"))?
        .ok_or(WatchError::Connection("stream closed before first update"))?
        .map_err(WatchError::LaserStream)?;

    Ok(stream)
}

/// [`SubscriptionTransport`] backed by Helius Laserstream, one gRPC stream per wallet.
pub struct LaserstreamTransport {
    config: LaserstreamConfig,
}

impl LaserstreamTransport {
    pub fn new(config: &WatchConfig) -> Self {
        let config = LaserstreamConfig {
            api_key: config.laserstream_api_key.clone(),
            endpoint: config.laserstream_endpoint.clone(),
            channel_options: Default::default(),
            max_reconnect_attempts: Some(config.laserstream_reconnect_attempts),
            replay: true,
        };
        Self { config }
    }
}

#[async_trait]
impl SubscriptionTransport for LaserstreamTransport {
    /// Opens a slot-only stream and drops it once it produced an update.
    async fn health_check(&self) -> Result<(), WatchError> {
        let mut slots = HashMap::new();
        slots.insert("slots".into(), Default::default());
        let request = SubscribeRequest {
            slots,
            ..Default::default()
        };

        connect(&self.config, request).await.map(drop)
    }

    async fn open(&self, address: &Address) -> Result<TransactionStream, WatchError> {
        let request = SubscribeRequest {
            transactions: transfers::create_filter(address),
            commitment: Some(CommitmentLevel::Confirmed as i32),
            ..Default::default()
        };
        let stream = connect(&self.config, request).await?;

        let address = address.clone();
        let notifications = stream.flat_map(move |update| {
            let items = match update {
                Ok(SubscribeUpdate {
                    update_oneof: Some(UpdateOneof::Transaction(txn)),
                    ..
                }) => transfers::process_update(&address, &txn)
                    .into_iter()
                    .map(Ok)
                    .collect(),
                Ok(_) => Vec::new(),
                Err(error) => vec![Err(WatchError::LaserStream(error))],
            };
            futures::stream::iter(items)
        });

        Ok(Box::pin(notifications))
    }
}
