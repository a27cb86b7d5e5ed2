//! Live spread-analytics feed client.
//!
//! Keeps one WebSocket session to the analysis backend alive, merges its
//! `full_analysis` snapshots and `spread_update` ticks into a per-symbol,
//! per-broker table in price units, and republishes the merged state to any
//! number of subscribers.
//!
//! ```text
//!  WsTransport / TokioScheduler
//!        │ FeedEvent
//!    ┌───▼────┐
//!    │ router │  one task, one turn per event
//!    └───┬────┘
//!    ┌───▼──────────────────────────────┐
//!    │ LiveStore                        │
//!    │  ConnectionManager  Reconciler   │
//!    └───┬──────────────────────────────┘
//!        │ Arc<PublishedState>
//!    subscribers
//! ```

pub mod config;
pub mod market_data;
pub mod metrics;
pub mod state;

pub use config::Config;
pub use market_data::router::LiveFeed;
pub use state::snapshot::{BrokerMetrics, ConnectionStatus, PublishedState, Snapshot};
pub use state::store::{LiveStore, Subscription};
