use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, error, warn};

use crate::consts::{
    CLOSE_TIMEOUT, INITIAL_BACKOFF, MAX_BACKOFF, MAX_SUBSCRIBE_ATTEMPTS, OPEN_TIMEOUT,
};
use crate::transport::{SubscriptionTransport, TransactionStream};
use crate::types::{Address, CloseReason, SubscriptionState, TransactionNotification, WatchError};

/// Reconnect policy applied independently to every subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first reconnect.
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff.
    pub max_backoff: Duration,
    /// Consecutive failures after which the subscription gives up.
    pub max_attempts: u32,
    /// Budget for one open attempt.
    pub open_timeout: Duration,
    /// Budget for the task to stop after a close request before it is aborted.
    pub close_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            max_attempts: MAX_SUBSCRIBE_ATTEMPTS,
            open_timeout: OPEN_TIMEOUT,
            close_timeout: CLOSE_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

/// Sent to the manager when a subscription gave up reconnecting.
pub(crate) struct SubscriptionExit {
    pub(crate) address: Address,
    pub(crate) id: u64,
    pub(crate) error: String,
}

/// Channels a subscription task reports through.
#[derive(Clone)]
pub(crate) struct SubscriptionSinks {
    pub(crate) notifications: mpsc::Sender<TransactionNotification>,
    pub(crate) exits: mpsc::UnboundedSender<SubscriptionExit>,
}

/// Handle to a live subscription running in its own task.
///
/// Dropping the handle aborts the task, which drops the stream and releases
/// its connection.
pub(crate) struct Subscription {
    address: Address,
    id: u64,
    state: Arc<watch::Sender<SubscriptionState>>,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    close_timeout: Duration,
}

impl Subscription {
    /// Spawns the subscription task. The returned receiver resolves once the
    /// first open attempt finished, successfully or not.
    pub(crate) fn spawn(
        address: Address,
        id: u64,
        transport: Arc<dyn SubscriptionTransport>,
        policy: RetryPolicy,
        sinks: SubscriptionSinks,
    ) -> (Self, oneshot::Receiver<()>) {
        let (state, _) = watch::channel(SubscriptionState::Pending);
        let state = Arc::new(state);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (first_tx, first_rx) = oneshot::channel();

        let close_timeout = policy.close_timeout;
        let task = SubscriptionTask {
            address: address.clone(),
            id,
            transport,
            policy,
            sinks,
            state: state.clone(),
            first_attempt: Some(first_tx),
        };
        let task = tokio::spawn(task.run(cancel_rx));

        let subscription = Self {
            address,
            id,
            state,
            cancel: Some(cancel_tx),
            task,
            close_timeout,
        };
        (subscription, first_rx)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        self.state.borrow().clone()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Stops the task and waits for it to release its stream, aborting it
    /// after the close timeout.
    pub(crate) async fn close(mut self) {
        self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            *state = SubscriptionState::Closing;
            true
        });
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }

        if time::timeout(self.close_timeout, &mut self.task).await.is_err() {
            warn!(address = %self.address, "subscription did not stop in time, aborting");
            self.task.abort();
        }

        self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            *state = SubscriptionState::Closed(CloseReason::Requested);
            true
        });
        debug!(address = %self.address, "subscription closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct SubscriptionTask {
    address: Address,
    id: u64,
    transport: Arc<dyn SubscriptionTransport>,
    policy: RetryPolicy,
    sinks: SubscriptionSinks,
    state: Arc<watch::Sender<SubscriptionState>>,
    first_attempt: Option<oneshot::Sender<()>>,
}

impl SubscriptionTask {
    /// Keeps the wallet stream open until cancelled or out of retries.
    ///
    /// `cancel` also resolves when the handle is dropped.
    async fn run(mut self, mut cancel: oneshot::Receiver<()>) {
        let mut backoff = self.policy.initial_backoff;
        let mut failures = 0;

        loop {
            let open = time::timeout(self.policy.open_timeout, self.transport.open(&self.address));
            let opened = tokio::select! {
                biased;
                _ = &mut cancel => return,
                opened = open => opened,
            };

            let error = match opened {
                Ok(Ok(stream)) => {
                    self.publish(SubscriptionState::Active);
                    self.finish_first_attempt();
                    debug!(address = %self.address, "subscription active");
                    failures = 0;
                    backoff = self.policy.initial_backoff;

                    tokio::select! {
                        biased;
                        _ = &mut cancel => return,
                        error = self.forward(stream) => error,
                    }
                }
                Ok(Err(error)) => error,
                Err(_) => WatchError::Timeout("subscription open"),
            };
            self.finish_first_attempt();

            failures += 1;
            if failures >= self.policy.max_attempts {
                error!(address = %self.address, %error, failures, "subscription out of retries");
                self.publish(SubscriptionState::Closed(CloseReason::Failed(error.to_string())));
                let _ = self.sinks.exits.send(SubscriptionExit {
                    address: self.address.clone(),
                    id: self.id,
                    error: error.to_string(),
                });
                return;
            }

            warn!(
                address = %self.address,
                %error,
                failures,
                backoff_ms = backoff.as_millis() as u64,
                "subscription failed, reconnecting"
            );
            self.publish(SubscriptionState::Pending);

            tokio::select! {
                biased;
                _ = &mut cancel => return,
                _ = time::sleep(backoff) => {}
            }
            backoff = self.policy.next_backoff(backoff);
        }
    }

    /// Forwards notifications until the stream fails or ends.
    async fn forward(&self, mut stream: TransactionStream) -> WatchError {
        while let Some(item) = stream.next().await {
            match item {
                Ok(notification) => {
                    if let Err(error) = self.sinks.notifications.try_send(notification) {
                        error!(address = %self.address, %error, "dropping transaction notification");
                    }
                }
                Err(error) => return error,
            }
        }
        WatchError::Connection("subscription stream ended")
    }

    /// Publishes `next` unless the handle already started closing.
    fn publish(&self, next: SubscriptionState) {
        self.state.send_if_modified(|state| {
            if *state == SubscriptionState::Closing || state.is_closed() {
                return false;
            }
            *state = next;
            true
        });
    }

    fn finish_first_attempt(&mut self) {
        if let Some(first_attempt) = self.first_attempt.take() {
            let _ = first_attempt.send(());
        }
    }
}
