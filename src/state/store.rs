use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::market_data::connection::{ConnectionId, ConnectionManager, FeedEvent, Scheduler, Transport};
use crate::market_data::reconciler::{Reconciled, Reconciler};
use crate::market_data::types::decode_frame;
use crate::metrics::prometheus;
use crate::state::snapshot::{ConnectionStatus, PublishedState, Snapshot};

/// Observer callback. Runs inside the event loop, so it must not block.
pub type Subscriber = Box<dyn FnMut(&Arc<PublishedState>) + Send>;

/// Handle returned by [`LiveStore::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "dropping a Subscription leaves the callback registered"]
pub struct Subscription(u64);

/// Demand-driven broadcast store.
///
/// Holds the latest [`PublishedState`] and fans it out to every subscriber,
/// in registration order, whenever the connection status or the snapshot
/// changes. The stream runs only while at least one subscriber is attached:
/// the first subscribe starts the connection manager and the last
/// unsubscribe stops it and discards the snapshot.
pub struct LiveStore<T, S> {
    manager: ConnectionManager<T, S>,
    reconciler: Reconciler,
    state: Arc<PublishedState>,
    subscribers: Vec<(u64, Subscriber)>,
    next_subscriber: u64,
}

impl<T: Transport, S: Scheduler> LiveStore<T, S> {
    pub fn new(config: &Config, transport: T, scheduler: S) -> Self {
        Self {
            manager: ConnectionManager::new(
                config.endpoint.clone(),
                config.retry_delay,
                transport,
                scheduler,
            ),
            reconciler: Reconciler::new(config.normalization_divisor),
            state: Arc::new(PublishedState::initial()),
            subscribers: Vec::new(),
            next_subscriber: 0,
        }
    }

    pub fn state(&self) -> Arc<PublishedState> {
        Arc::clone(&self.state)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn manager(&self) -> &ConnectionManager<T, S> {
        &self.manager
    }

    /// Register `callback`; it receives the current state before this returns.
    pub fn subscribe<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&Arc<PublishedState>) + Send + 'static,
    {
        self.subscribe_boxed(Box::new(callback))
    }

    pub fn subscribe_boxed(&mut self, mut callback: Subscriber) -> Subscription {
        if self.subscribers.is_empty() {
            if let Some(status) = self.manager.start() {
                prometheus::record_status_transition(status);
                self.state = Arc::new(PublishedState {
                    status,
                    data: Arc::clone(&self.state.data),
                });
            }
        }

        self.next_subscriber += 1;
        let id = self.next_subscriber;
        callback(&self.state);
        self.subscribers.push((id, callback));

        info!(subscriber = id, subscribers = self.subscribers.len(), "subscriber attached");
        prometheus::set_subscriber_count(self.subscribers.len());
        Subscription(id)
    }

    /// Detach a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let Some(pos) = self.subscribers.iter().position(|(id, _)| *id == subscription.0) else {
            return false;
        };
        drop(self.subscribers.remove(pos));

        info!(subscriber = subscription.0, subscribers = self.subscribers.len(), "subscriber detached");
        prometheus::set_subscriber_count(self.subscribers.len());

        if self.subscribers.is_empty() {
            self.teardown();
        }
        true
    }

    /// Drop every subscriber and stop the stream.
    pub fn shutdown(&mut self) {
        if !self.subscribers.is_empty() {
            info!(subscribers = self.subscribers.len(), "shutting down store");
            self.subscribers.clear();
            prometheus::set_subscriber_count(0);
        }
        self.teardown();
    }

    /// One turn of the event loop.
    pub fn handle_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Opened(conn) => {
                let transition = self.manager.on_open(conn);
                self.apply_transition(transition);
            }
            FeedEvent::Message(conn, text) => self.handle_frame(conn, &text),
            FeedEvent::Errored(conn, reason) => self.manager.on_error(conn, &reason),
            FeedEvent::Closed(conn) => {
                let transition = self.manager.on_close(conn);
                self.apply_transition(transition);
            }
            FeedEvent::RetryDue(timer) => {
                let transition = self.manager.on_retry_due(timer);
                self.apply_transition(transition);
            }
        }
    }

    fn handle_frame(&mut self, conn: ConnectionId, text: &str) {
        if !self.manager.accepts(conn) {
            debug!(conn = %conn, "message from inactive connection ignored");
            return;
        }

        for decoded in decode_frame(text) {
            let message = match decoded {
                Ok(message) => message,
                Err(err) => {
                    warn!(conn = %conn, error = %err, "discarding undecodable message");
                    prometheus::record_decode_error();
                    continue;
                }
            };

            prometheus::record_message(message.kind());
            let started = Instant::now();

            match self.reconciler.apply(&self.state.data, &message) {
                Reconciled::Replaced(snapshot) | Reconciled::Patched(snapshot) => {
                    prometheus::record_reconcile_latency_us(message.kind(), started.elapsed().as_micros());
                    self.replace_snapshot(snapshot);
                }
                Reconciled::Unchanged => prometheus::record_dropped_update(),
            }
        }
    }

    fn apply_transition(&mut self, transition: Option<ConnectionStatus>) {
        let Some(status) = transition else {
            return;
        };
        prometheus::record_status_transition(status);
        // Status-only change: the snapshot Arc is carried over.
        self.state = Arc::new(PublishedState {
            status,
            data: Arc::clone(&self.state.data),
        });
        self.publish();
    }

    fn replace_snapshot(&mut self, snapshot: Snapshot) {
        self.state = Arc::new(PublishedState {
            status: self.state.status,
            data: Arc::new(snapshot),
        });
        self.publish();
    }

    fn publish(&mut self) {
        let state = Arc::clone(&self.state);
        debug!(
            status = %state.status,
            symbols = state.data.symbol_count(),
            subscribers = self.subscribers.len(),
            "publishing state"
        );
        for (_, callback) in &mut self.subscribers {
            callback(&state);
        }
    }

    fn teardown(&mut self) {
        self.manager.stop();
        self.state = Arc::new(PublishedState::initial());
    }
}
