use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::market_data::adapters::websocket::{TokioScheduler, WsTransport};
use crate::market_data::connection::{FeedEvent, Scheduler, Transport};
use crate::state::snapshot::PublishedState;
use crate::state::store::{LiveStore, Subscriber, Subscription};

/// Transport→router channel buffer.
/// Sized to absorb WebSocket bursts without back-pressuring the socket task.
pub const EVENT_CHANNEL_BUFFER: usize = 4_096;

const COMMAND_CHANNEL_BUFFER: usize = 64;

/// Requests from outside the event loop.
pub enum Command {
    Subscribe {
        callback: Subscriber,
        reply: oneshot::Sender<Subscription>,
    },
    Unsubscribe(Subscription),
}

/// The single event loop: every transport callback, timer expiry and
/// subscriber change is one turn against the exclusively owned store.
///
/// Returns once every command sender is gone, after tearing the store down.
pub async fn run_router<T, S>(
    mut store: LiveStore<T, S>,
    mut events: mpsc::Receiver<FeedEvent>,
    mut commands: mpsc::Receiver<Command>,
) -> anyhow::Result<()>
where
    T: Transport,
    S: Scheduler,
{
    info!("router started");

    loop {
        tokio::select! {
            // Subscriber changes first so a teardown wins over queued socket traffic.
            biased;
            cmd = commands.recv() => match cmd {
                Some(Command::Subscribe { callback, reply }) => {
                    let subscription = store.subscribe_boxed(callback);
                    if let Err(subscription) = reply.send(subscription) {
                        debug!("subscriber went away before the reply");
                        store.unsubscribe(subscription);
                    }
                }
                Some(Command::Unsubscribe(subscription)) => {
                    store.unsubscribe(subscription);
                }
                None => break,
            },
            Some(event) = events.recv() => store.handle_event(event),
        }
    }

    store.shutdown();
    info!("router stopped");
    Ok(())
}

/// Cloneable handle to a running feed.
#[derive(Clone)]
pub struct LiveFeed {
    commands: mpsc::Sender<Command>,
}

impl LiveFeed {
    /// Spawn a feed that talks to `config.endpoint` over WebSocket.
    pub fn connect(config: &Config) -> (Self, JoinHandle<anyhow::Result<()>>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let store = LiveStore::new(
            config,
            WsTransport::new(events_tx.clone()),
            TokioScheduler::new(events_tx),
        );
        Self::spawn(store, events_rx)
    }

    /// Spawn the router over a store built with any transport/scheduler pair.
    pub fn spawn<T, S>(
        store: LiveStore<T, S>,
        events: mpsc::Receiver<FeedEvent>,
    ) -> (Self, JoinHandle<anyhow::Result<()>>)
    where
        T: Transport + Send + 'static,
        S: Scheduler + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let handle = tokio::spawn(run_router(store, events, commands_rx));
        (Self { commands: commands_tx }, handle)
    }

    /// Register `callback`; it has already seen the current state when this resolves.
    pub async fn subscribe<F>(&self, callback: F) -> anyhow::Result<Subscription>
    where
        F: FnMut(&Arc<PublishedState>) + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                callback: Box::new(callback),
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("feed router is not running"))?;
        reply_rx.await.context("feed router dropped the subscribe request")
    }

    pub async fn unsubscribe(&self, subscription: Subscription) -> anyhow::Result<()> {
        self.commands
            .send(Command::Unsubscribe(subscription))
            .await
            .map_err(|_| anyhow::anyhow!("feed router is not running"))
    }
}
