//! Tokio-backed [`Transport`] and [`Scheduler`].
//!
//! Each connection runs in its own task and reports back to the event loop
//! through a shared `FeedEvent` channel. The task always finishes with
//! `Closed(id)`, whether the peer hung up, the read failed, or the manager
//! asked for the close.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::market_data::connection::{ConnectionId, FeedEvent, Scheduler, TimerId, Transport};

pub struct WsTransport {
    events: mpsc::Sender<FeedEvent>,
    /// Close signals for live sessions.
    sessions: HashMap<ConnectionId, oneshot::Sender<()>>,
}

impl WsTransport {
    pub fn new(events: mpsc::Sender<FeedEvent>) -> Self {
        Self {
            events,
            sessions: HashMap::new(),
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, id: ConnectionId, endpoint: &str) {
        // Finished sessions have dropped their receiver.
        self.sessions.retain(|_, close| !close.is_closed());

        let (close_tx, close_rx) = oneshot::channel();
        self.sessions.insert(id, close_tx);
        tokio::spawn(run_session(id, endpoint.to_string(), self.events.clone(), close_rx));
    }

    fn close(&mut self, id: ConnectionId) {
        if let Some(close) = self.sessions.remove(&id) {
            // Err means the session already ended on its own.
            let _ = close.send(());
        }
    }
}

async fn run_session(
    id: ConnectionId,
    url: String,
    events: mpsc::Sender<FeedEvent>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let ws_stream = tokio::select! {
        res = tokio_tungstenite::connect_async(url.as_str()) => match res {
            Ok((stream, _response)) => stream,
            Err(e) => {
                let _ = events.send(FeedEvent::Errored(id, format!("connection failed: {e}"))).await;
                let _ = events.send(FeedEvent::Closed(id)).await;
                return;
            }
        },
        _ = &mut close_rx => {
            debug!(conn = %id, "closed before connect completed");
            let _ = events.send(FeedEvent::Closed(id)).await;
            return;
        }
    };

    if events.send(FeedEvent::Opened(id)).await.is_err() {
        return;
    }

    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    debug!(conn = %id, error = %e, "close frame not delivered");
                }
                break;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if events.send(FeedEvent::Message(id, text)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if events.send(FeedEvent::Message(id, text)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(conn = %id, error = %e, "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(conn = %id, ?frame, "peer closed connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(FeedEvent::Errored(id, format!("read error: {e}"))).await;
                    break;
                }
                None => break,
            }
        }
    }

    let _ = events.send(FeedEvent::Closed(id)).await;
}

/// Retry timers on the tokio clock.
pub struct TokioScheduler {
    events: mpsc::Sender<FeedEvent>,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(events: mpsc::Sender<FeedEvent>) -> Self {
        Self {
            events,
            timers: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, id: TimerId, delay: Duration) {
        self.timers.retain(|_, handle| !handle.is_finished());

        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(FeedEvent::RetryDue(id)).await;
        });
        self.timers.insert(id, handle);
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}
