//! Bridge from the store's change feed into cache invalidation.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::repos::{ChangeEvent, PostStore};
use crate::util::backoff::BackoffPolicy;

use super::trigger::CacheTrigger;

pub(crate) const METRIC_REALTIME_RECONNECT: &str = "postwire_realtime_reconnect_total";

const DEFAULT_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_EVENT_BUFFER: usize = 256;
const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub backoff: BackoffPolicy,
    /// Consecutive failures after which the bridge gives up; the failure
    /// that reaches this count is not retried.
    pub max_attempts: u32,
    /// Capacity of the broadcast channel behind [`SubscriptionHandle::events`].
    pub event_buffer: usize,
    /// A subscribe call taking longer counts as a failure.
    pub subscribe_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
        }
    }
}

impl From<&crate::config::RealtimeSettings> for RealtimeConfig {
    fn from(settings: &crate::config::RealtimeSettings) -> Self {
        Self {
            backoff: BackoffPolicy {
                base: Duration::from_millis(settings.backoff_base_ms),
                cap: Duration::from_millis(settings.backoff_cap_ms.max(settings.backoff_base_ms)),
                jitter: settings.backoff_jitter,
            },
            max_attempts: settings.max_attempts.get(),
            event_buffer: settings.event_buffer.get(),
            subscribe_timeout: settings.subscribe_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeStatus {
    Connecting,
    Connected,
    /// Waiting to retry after `attempt` consecutive failures.
    Reconnecting { attempt: u32 },
    /// Retries exhausted; the listing was moved into an error state.
    Failed { message: String },
    Stopped,
}

/// Keeps the cache in step with the store's change feed.
///
/// Every insert, update or delete marks the listing and the affected post
/// stale. When the feed breaks the bridge resubscribes with backoff and, once
/// reconnected, marks the whole cache stale because events may have been
/// missed in between.
pub struct RealtimeBridge {
    store: Arc<dyn PostStore>,
    trigger: Arc<CacheTrigger>,
    config: RealtimeConfig,
}

impl RealtimeBridge {
    pub fn new(store: Arc<dyn PostStore>, trigger: Arc<CacheTrigger>, config: RealtimeConfig) -> Self {
        Self {
            store,
            trigger,
            config,
        }
    }

    /// Spawn the bridge task. Must be called within a tokio runtime.
    pub fn start(self) -> SubscriptionHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(self.config.event_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(BridgeStatus::Connecting);

        info!(
            backend = self.store.backend_name(),
            max_attempts = self.config.max_attempts,
            "Starting realtime bridge"
        );

        let task = tokio::spawn(self.run(stop_rx, events_tx.clone(), status_tx));

        SubscriptionHandle {
            stop: stop_tx,
            task: Some(task),
            events: events_tx,
            status: status_rx,
        }
    }

    async fn run(
        self,
        mut stop: watch::Receiver<bool>,
        events: broadcast::Sender<ChangeEvent>,
        status: watch::Sender<BridgeStatus>,
    ) {
        let backend = self.store.backend_name();
        let mut failures: u32 = 0;
        let mut connected_once = false;

        'bridge: loop {
            if *stop.borrow() {
                break;
            }
            status.send_replace(if failures == 0 {
                BridgeStatus::Connecting
            } else {
                BridgeStatus::Reconnecting { attempt: failures }
            });

            let subscribed = tokio::select! {
                _ = stop.changed() => break 'bridge,
                result = tokio::time::timeout(
                    self.config.subscribe_timeout,
                    self.store.subscribe(),
                ) => result,
            };

            let reason = match subscribed {
                Ok(Ok(mut stream)) => {
                    if connected_once {
                        counter!(METRIC_REALTIME_RECONNECT).increment(1);
                        info!(backend, failures, "Change feed reconnected; resyncing cache");
                        self.trigger.feed_resynced().await;
                    } else {
                        info!(backend, "Change feed connected");
                    }
                    connected_once = true;
                    failures = 0;
                    status.send_replace(BridgeStatus::Connected);

                    'stream: loop {
                        tokio::select! {
                            _ = stop.changed() => break 'bridge,
                            next = stream.next() => match next {
                                Some(Ok(event)) => {
                                    debug!(
                                        post_id = %event.id,
                                        change = event.kind.as_str(),
                                        "Change event received"
                                    );
                                    self.trigger.change_received(&event).await;
                                    // No receivers is fine.
                                    let _ = events.send(event);
                                }
                                Some(Err(err)) => break 'stream err.to_string(),
                                None => break 'stream "change feed closed".to_string(),
                            },
                        }
                    }
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!(
                    "subscribe timed out after {} ms",
                    self.config.subscribe_timeout.as_millis()
                ),
            };

            failures += 1;
            if failures >= self.config.max_attempts.max(1) {
                error!(
                    backend,
                    failures,
                    reason = %reason,
                    "Change feed retries exhausted; giving up"
                );
                self.trigger.feed_failed(reason.clone()).await;
                status.send_replace(BridgeStatus::Failed { message: reason });
                return;
            }

            let delay = self.config.backoff.delay(failures - 1);
            warn!(
                backend,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Change feed lost; retrying"
            );
            status.send_replace(BridgeStatus::Reconnecting { attempt: failures });

            tokio::select! {
                _ = stop.changed() => break 'bridge,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(backend, "Realtime bridge stopped");
        status.send_replace(BridgeStatus::Stopped);
    }
}

/// Owner of a running bridge. Dropping it aborts the task.
pub struct SubscriptionHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    events: broadcast::Sender<ChangeEvent>,
    status: watch::Receiver<BridgeStatus>,
}

impl SubscriptionHandle {
    /// Change events as they are applied to the cache.
    pub fn events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> BridgeStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<BridgeStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `predicate`, returning that status.
    pub async fn wait_for_status<F>(&self, mut predicate: F) -> BridgeStatus
    where
        F: FnMut(&BridgeStatus) -> bool,
    {
        let mut status = self.status.clone();
        match status.wait_for(|value| predicate(value)).await {
            Ok(value) => value.clone(),
            Err(_) => BridgeStatus::Stopped,
        }
    }

    /// Stop the bridge and wait for its task to finish.
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Realtime bridge task ended abnormally");
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
