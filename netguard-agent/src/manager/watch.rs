use std::future::Future;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::backoff::{Backoff, Clock};
use crate::metrics::Metrics;

/// Change to a cluster object, decoded once at the watch boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Modified(_) => "modified",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}

pub type EventStream<T> = BoxStream<'static, Result<WatchEvent<T>>>;

/// List and watch access to one kind of cluster object.
pub trait ClusterSource<T>: Send + Sync + 'static {
    fn list(&self) -> impl Future<Output = Result<Vec<T>>> + Send;
    fn watch(&self) -> impl Future<Output = Result<EventStream<T>>> + Send;
}

pub trait EventHandler<T>: Send + Sync + 'static {
    fn apply(&self, event: WatchEvent<T>) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscriptionState {
    Connecting,
    Streaming,
    Backoff,
}

/// Keeps one watch alive for the lifetime of the process.
///
/// Connecting opens the watch, Streaming applies events in delivery order
/// and Backoff waits before reconnecting. The delay doubles per failed
/// cycle and resets once an event was delivered.
pub struct Subscription<S, H, C> {
    resource: &'static str,
    source: S,
    handler: H,
    clock: C,
    backoff: Backoff,
    metrics: Metrics,
}

impl<S, H, C> Subscription<S, H, C> {
    pub fn new(
        resource: &'static str,
        source: S,
        handler: H,
        clock: C,
        backoff: Backoff,
        metrics: Metrics,
    ) -> Self {
        Self {
            resource,
            source,
            handler,
            clock,
            backoff,
            metrics,
        }
    }

    /// Runs until `cancel` fires. Cancellation is observed between events
    /// and during backoff, never while an event is being applied.
    pub async fn run<T>(mut self, cancel: CancellationToken)
    where
        S: ClusterSource<T>,
        H: EventHandler<T>,
        C: Clock,
        T: Send + 'static,
    {
        let resource = self.resource;
        let mut state = SubscriptionState::Connecting;
        let mut stream: Option<EventStream<T>> = None;

        loop {
            state = match state {
                SubscriptionState::Connecting => {
                    select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        r = self.source.watch() => match r {
                            Ok(s) => {
                                info!(resource, "watch started");
                                stream = Some(s);
                                SubscriptionState::Streaming
                            }
                            Err(e) => {
                                warn!(%e, resource, "failed to start watch");
                                SubscriptionState::Backoff
                            }
                        }
                    }
                }
                SubscriptionState::Streaming => {
                    let Some(events) = stream.as_mut() else {
                        state = SubscriptionState::Connecting;
                        continue;
                    };
                    select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        next = events.next() => match next {
                            Some(Ok(event)) => {
                                let kind = event.kind();
                                debug!(resource, kind, "applying watch event");
                                match self.handler.apply(event) {
                                    Ok(()) => {}
                                    // the next reconciliation rewrites the record
                                    Err(e) if e.is_retryable() => {
                                        warn!(%e, resource, kind, "watch event left kernel map stale");
                                    }
                                    Err(e) => {
                                        error!(%e, resource, kind, "failed to apply watch event");
                                    }
                                }
                                self.metrics.count_watch_event(resource, kind);
                                self.backoff.reset();
                                SubscriptionState::Streaming
                            }
                            Some(Err(e)) => {
                                warn!(%e, resource, "watch stream failed");
                                stream = None;
                                SubscriptionState::Backoff
                            }
                            None => {
                                info!(resource, "watch stream ended");
                                stream = None;
                                SubscriptionState::Backoff
                            }
                        }
                    }
                }
                SubscriptionState::Backoff => {
                    self.metrics.count_watch_restart(resource);
                    let delay = self.backoff.next_delay();
                    debug!(resource, ?delay, "backing off before reconnect");
                    select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.clock.sleep(delay) => SubscriptionState::Connecting,
                    }
                }
            };
        }
        info!(resource, "watch stopped");
    }
}
