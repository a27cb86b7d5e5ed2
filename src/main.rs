use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spread_feed::metrics::prometheus;
use spread_feed::{Config, LiveFeed, PublishedState};

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

/// Stand-in for a dashboard: one log line per publish plus the tightest
/// broker for each symbol.
fn log_published_state(state: &Arc<PublishedState>) {
    info!(
        status = %state.status,
        symbols = state.data.symbol_count(),
        records = state.data.record_count(),
        "live state"
    );
    for (symbol, _) in state.data.iter() {
        if let Some((broker, spread)) = state.data.tightest_broker(symbol) {
            info!(%symbol, %broker, current_spread = spread, "tightest spread");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    if let Some(port) = config.metrics_port {
        if let Err(err) = prometheus::init_metrics_server(port) {
            warn!(error = %err, port, "metrics exporter failed to start");
        }
    }

    info!(endpoint = %config.endpoint, "spread-feed starting");

    let (feed, mut router_handle) = LiveFeed::connect(&config);
    let subscription = feed.subscribe(log_published_state).await?;

    tokio::select! {
        res = &mut router_handle => {
            match res {
                Ok(Ok(())) => warn!("router exited"),
                Ok(Err(err)) => warn!(error = %err, "router returned error"),
                Err(err) => warn!(error = %err, "router task panicked"),
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
        }
    }

    // Last subscriber leaving tears the connection down.
    feed.unsubscribe(subscription).await?;
    drop(feed);

    match router_handle.await {
        Ok(res) => res,
        Err(err) => Err(err.into()),
    }
}
