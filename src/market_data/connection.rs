//! Connection lifecycle as an explicit state machine.
//!
//! [`ConnectionManager`] owns the single transport handle and the single
//! retry timer. It never performs I/O itself: it asks a [`Transport`] to open
//! or close and a [`Scheduler`] to arm or cancel a timer, and learns about the
//! outcome later through the `on_*` entry points. Every connection and timer
//! gets a fresh id, and callbacks carrying an id that is no longer current are
//! ignored, so a late event from a torn-down socket or cancelled timer cannot
//! disturb a newer session.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::state::snapshot::ConnectionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl ConnectionId {
    /// Ids are normally allocated by the manager; this is for driving a
    /// transport on its own.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Callbacks from a transport or scheduler, delivered to the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Opened(ConnectionId),
    Message(ConnectionId, String),
    Errored(ConnectionId, String),
    Closed(ConnectionId),
    RetryDue(TimerId),
}

/// Opens and closes the underlying socket.
///
/// Both calls return immediately. The outcome is reported back to the
/// manager as `on_open` / `on_message` / `on_error` / `on_close` tagged with
/// the same id. After `close(id)` the transport should still report
/// `on_close(id)`; the manager ignores it if it no longer cares.
pub trait Transport {
    fn open(&mut self, id: ConnectionId, endpoint: &str);
    fn close(&mut self, id: ConnectionId);
}

/// One-shot timers that fire `on_retry_due(id)` after `delay`.
pub trait Scheduler {
    fn schedule(&mut self, id: TimerId, delay: Duration);
    fn cancel(&mut self, id: TimerId);
}

pub struct ConnectionManager<T, S> {
    endpoint: String,
    retry_delay: Duration,
    transport: T,
    scheduler: S,
    status: ConnectionStatus,
    running: bool,
    active: Option<ConnectionId>,
    pending_retry: Option<TimerId>,
    next_id: u64,
}

impl<T: Transport, S: Scheduler> ConnectionManager<T, S> {
    pub fn new(endpoint: impl Into<String>, retry_delay: Duration, transport: T, scheduler: S) -> Self {
        Self {
            endpoint: endpoint.into(),
            retry_delay,
            transport,
            scheduler,
            status: ConnectionStatus::Connecting,
            running: false,
            active: None,
            pending_retry: None,
            next_id: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn active_connection(&self) -> Option<ConnectionId> {
        self.active
    }

    pub fn pending_retry(&self) -> Option<TimerId> {
        self.pending_retry
    }

    /// Whether messages tagged with `id` should be processed.
    pub fn accepts(&self, id: ConnectionId) -> bool {
        self.running && self.active == Some(id)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Begin connecting unless a session is already live.
    ///
    /// Returns the new status when a transition happened.
    pub fn start(&mut self) -> Option<ConnectionStatus> {
        if self.running {
            debug!(status = %self.status, "start ignored, already running");
            return None;
        }
        self.running = true;
        info!(endpoint = %self.endpoint, "starting live feed");
        Some(self.connect())
    }

    /// Tear down the session. Safe to call repeatedly or before `start`.
    ///
    /// After this returns, no id issued so far is honoured again.
    pub fn stop(&mut self) {
        if let Some(timer) = self.pending_retry.take() {
            self.scheduler.cancel(timer);
        }
        if let Some(conn) = self.active.take() {
            self.transport.close(conn);
        }
        if self.running {
            info!(endpoint = %self.endpoint, "live feed stopped");
        }
        self.running = false;
        self.status = ConnectionStatus::Connecting;
    }

    pub fn on_open(&mut self, id: ConnectionId) -> Option<ConnectionStatus> {
        if !self.accepts(id) || self.status != ConnectionStatus::Connecting {
            debug!(conn = %id, "stale open ignored");
            return None;
        }
        info!(conn = %id, endpoint = %self.endpoint, "connected");
        self.status = ConnectionStatus::Connected;
        Some(self.status)
    }

    /// Errors only ask the transport to close; `on_close` does the rest.
    pub fn on_error(&mut self, id: ConnectionId, reason: &str) {
        if !self.accepts(id) {
            debug!(conn = %id, reason, "stale error ignored");
            return;
        }
        warn!(conn = %id, reason, "transport error");
        self.transport.close(id);
    }

    pub fn on_close(&mut self, id: ConnectionId) -> Option<ConnectionStatus> {
        if !self.accepts(id) {
            debug!(conn = %id, "stale close ignored");
            return None;
        }
        self.active = None;
        self.status = ConnectionStatus::Disconnected;

        let timer = TimerId(self.allocate_id());
        self.pending_retry = Some(timer);
        self.scheduler.schedule(timer, self.retry_delay);
        info!(
            conn = %id,
            retry_in_ms = self.retry_delay.as_millis() as u64,
            "disconnected, retrying"
        );
        Some(self.status)
    }

    pub fn on_retry_due(&mut self, id: TimerId) -> Option<ConnectionStatus> {
        if !self.running || self.pending_retry != Some(id) {
            debug!(timer = %id, "stale retry timer ignored");
            return None;
        }
        self.pending_retry = None;
        Some(self.connect())
    }

    fn connect(&mut self) -> ConnectionStatus {
        if let Some(timer) = self.pending_retry.take() {
            self.scheduler.cancel(timer);
        }
        let conn = ConnectionId(self.allocate_id());
        self.active = Some(conn);
        self.status = ConnectionStatus::Connecting;
        debug!(conn = %conn, endpoint = %self.endpoint, "opening transport");
        self.transport.open(conn, &self.endpoint);
        self.status
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}
