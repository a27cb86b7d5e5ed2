//! Fakes for driving a `LiveStore` without sockets or real time.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use spread_feed::market_data::connection::{ConnectionId, Scheduler, TimerId, Transport};
use spread_feed::state::store::Subscriber;
use spread_feed::{Config, LiveStore, PublishedState};

/// Records open/close requests; the test plays the remote side.
#[derive(Debug, Default)]
pub struct FakeTransport {
    pub opened: Vec<(ConnectionId, String)>,
    pub closed: Vec<ConnectionId>,
}

impl FakeTransport {
    /// Connections opened and not yet closed.
    pub fn live(&self) -> Vec<ConnectionId> {
        self.opened
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !self.closed.contains(id))
            .collect()
    }
}

impl Transport for FakeTransport {
    fn open(&mut self, id: ConnectionId, endpoint: &str) {
        self.opened.push((id, endpoint.to_string()));
    }

    fn close(&mut self, id: ConnectionId) {
        self.closed.push(id);
    }
}

#[derive(Debug, Default)]
struct ClockState {
    now: Duration,
    pending: Vec<(TimerId, Duration)>,
}

/// Simulated clock shared between a test and its scheduler.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    pub fn scheduler(&self) -> ManualScheduler {
        ManualScheduler {
            clock: self.clone(),
        }
    }

    /// Move time forward and return the timers that came due, in deadline order.
    pub fn advance(&self, by: Duration) -> Vec<TimerId> {
        let mut state = self.inner.lock().unwrap();
        state.now += by;
        let now = state.now;
        let mut due: Vec<(TimerId, Duration)> = Vec::new();
        state.pending.retain(|&(id, at)| {
            if at <= now {
                due.push((id, at));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|&(_, at)| at);
        due.into_iter().map(|(id, _)| id).collect()
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}

#[derive(Debug)]
pub struct ManualScheduler {
    clock: ManualClock,
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, id: TimerId, delay: Duration) {
        let mut state = self.clock.inner.lock().unwrap();
        let at = state.now + delay;
        state.pending.push((id, at));
    }

    fn cancel(&mut self, id: TimerId) {
        self.clock
            .inner
            .lock()
            .unwrap()
            .pending
            .retain(|&(pending, _)| pending != id);
    }
}

pub type TestStore = LiveStore<FakeTransport, ManualScheduler>;

pub fn store() -> (TestStore, ManualClock) {
    let clock = ManualClock::default();
    let store = LiveStore::new(&Config::default(), FakeTransport::default(), clock.scheduler());
    (store, clock)
}

/// Every state a subscriber has received, in order.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Arc<PublishedState>>>>,
}

impl Recorder {
    pub fn callback(&self) -> Subscriber {
        let seen = Arc::clone(&self.seen);
        Box::new(move |state| seen.lock().unwrap().push(Arc::clone(state)))
    }

    pub fn all(&self) -> Vec<Arc<PublishedState>> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<PublishedState> {
        self.seen
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("subscriber has not received anything")
    }
}

pub fn active_connection(store: &TestStore) -> ConnectionId {
    store
        .manager()
        .active_connection()
        .expect("no active connection")
}

pub fn full_analysis(payload: serde_json::Value) -> String {
    serde_json::json!({"type": "full_analysis", "payload": payload}).to_string()
}

pub fn spread_update(symbol: &str, broker: &str, current_spread: f64) -> String {
    serde_json::json!({
        "type": "spread_update",
        "symbol": symbol,
        "broker": broker,
        "current_spread": current_spread,
    })
    .to_string()
}
