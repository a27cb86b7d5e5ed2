use std::time::Duration;

use anyhow::{Context, bail};

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:5000/ws";

/// Backend sends spreads as pips (price × 100000).
pub const DEFAULT_NORMALIZATION_DIVISOR: f64 = 100_000.0;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub endpoint: String,
    pub normalization_divisor: f64,
    /// Fixed delay between a close and the next connection attempt. No backoff.
    pub retry_delay: Duration,
    /// Prometheus exporter port; the exporter stays off when unset.
    pub metrics_port: Option<u16>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            normalization_divisor: DEFAULT_NORMALIZATION_DIVISOR,
            retry_delay: DEFAULT_RETRY_DELAY,
            metrics_port: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // dotenvy loads .env, but doesn't override already-set env vars
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, falling back to defaults
    /// for missing keys.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let endpoint = lookup("SPREAD_FEED_ENDPOINT").unwrap_or(defaults.endpoint);
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            bail!("SPREAD_FEED_ENDPOINT must be a ws:// or wss:// url, got {endpoint:?}");
        }

        let normalization_divisor = match lookup("SPREAD_FEED_DIVISOR") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid SPREAD_FEED_DIVISOR {raw:?}"))?,
            None => defaults.normalization_divisor,
        };
        if !normalization_divisor.is_finite() || normalization_divisor == 0.0 {
            bail!("SPREAD_FEED_DIVISOR must be finite and non-zero, got {normalization_divisor}");
        }

        let retry_delay = match lookup("SPREAD_FEED_RETRY_MS") {
            Some(raw) => Duration::from_millis(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("invalid SPREAD_FEED_RETRY_MS {raw:?}"))?,
            ),
            None => defaults.retry_delay,
        };

        let metrics_port = lookup("SPREAD_FEED_METRICS_PORT")
            .map(|raw| {
                raw.trim()
                    .parse::<u16>()
                    .with_context(|| format!("invalid SPREAD_FEED_METRICS_PORT {raw:?}"))
            })
            .transpose()?;

        let log_level = lookup("RUST_LOG").unwrap_or(defaults.log_level);

        Ok(Self {
            endpoint,
            normalization_divisor,
            retry_delay,
            metrics_port,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.endpoint, "ws://127.0.0.1:5000/ws");
        assert_eq!(config.normalization_divisor, 100_000.0);
        assert_eq!(config.retry_delay, Duration::from_millis(3_000));
        assert_eq!(config.metrics_port, None);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("SPREAD_FEED_ENDPOINT", "wss://feed.example.com/ws"),
            ("SPREAD_FEED_DIVISOR", " 10000 "),
            ("SPREAD_FEED_RETRY_MS", "250"),
            ("SPREAD_FEED_METRICS_PORT", "9000"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint, "wss://feed.example.com/ws");
        assert_eq!(config.normalization_divisor, 10_000.0);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.metrics_port, Some(9000));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_rejects_non_websocket_endpoint() {
        let err = Config::from_lookup(lookup_from(&[("SPREAD_FEED_ENDPOINT", "http://x/ws")]));
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_zero_or_garbage_divisor() {
        assert!(Config::from_lookup(lookup_from(&[("SPREAD_FEED_DIVISOR", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("SPREAD_FEED_DIVISOR", "pips")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("SPREAD_FEED_DIVISOR", "inf")])).is_err());
    }

    #[test]
    fn test_rejects_bad_retry_and_port() {
        assert!(Config::from_lookup(lookup_from(&[("SPREAD_FEED_RETRY_MS", "-5")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("SPREAD_FEED_METRICS_PORT", "70000")])).is_err());
    }
}
