use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

pub const AVG_SPREAD: &str = "avg_spread";
pub const MAX_SPREAD: &str = "max_spread";
pub const SPREAD_STD_DEV: &str = "spread_std_dev";
pub const CURRENT_SPREAD: &str = "current_spread";

/// Fields that arrive in pips and are stored in price units.
pub const SPREAD_FIELDS: [&str; 4] = [AVG_SPREAD, MAX_SPREAD, SPREAD_STD_DEV, CURRENT_SPREAD];

/// One broker's analytics record for a symbol.
///
/// Backed by the raw JSON object so that fields the backend adds beyond the
/// four spread fields survive untouched, and so that a spread field holding a
/// non-numeric value can be kept as-is instead of being coerced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerMetrics(Map<String, Value>);

impl BrokerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn avg_spread(&self) -> Option<f64> {
        self.number(AVG_SPREAD)
    }

    pub fn max_spread(&self) -> Option<f64> {
        self.number(MAX_SPREAD)
    }

    pub fn spread_std_dev(&self) -> Option<f64> {
        self.number(SPREAD_STD_DEV)
    }

    pub fn current_spread(&self) -> Option<f64> {
        self.number(CURRENT_SPREAD)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Numeric value of `field`, if present and a JSON number.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Store `value` under `field`. Non-finite values have no JSON form and
    /// are refused, leaving the record unchanged.
    pub fn set_number(&mut self, field: &str, value: f64) -> bool {
        match Number::from_f64(value) {
            Some(n) => {
                self.0.insert(field.to_string(), Value::Number(n));
                true
            }
            None => false,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for BrokerMetrics {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

pub type BrokerTable = HashMap<String, BrokerMetrics>;

/// symbol → broker → metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(HashMap<String, BrokerTable>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn symbol_count(&self) -> usize {
        self.0.len()
    }

    /// Number of (symbol, broker) records.
    pub fn record_count(&self) -> usize {
        self.0.values().map(HashMap::len).sum()
    }

    pub fn brokers(&self, symbol: &str) -> Option<&BrokerTable> {
        self.0.get(symbol)
    }

    pub fn get(&self, symbol: &str, broker: &str) -> Option<&BrokerMetrics> {
        self.0.get(symbol)?.get(broker)
    }

    pub fn get_mut(&mut self, symbol: &str, broker: &str) -> Option<&mut BrokerMetrics> {
        self.0.get_mut(symbol)?.get_mut(broker)
    }

    pub fn insert(
        &mut self,
        symbol: impl Into<String>,
        broker: impl Into<String>,
        metrics: BrokerMetrics,
    ) {
        self.0
            .entry(symbol.into())
            .or_default()
            .insert(broker.into(), metrics);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BrokerTable)> {
        self.0.iter()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut BrokerMetrics> {
        self.0.values_mut().flat_map(HashMap::values_mut)
    }

    /// Broker with the smallest numeric `current_spread` for `symbol`.
    pub fn tightest_broker(&self, symbol: &str) -> Option<(&str, f64)> {
        self.0
            .get(symbol)?
            .iter()
            .filter_map(|(broker, m)| m.current_spread().map(|s| (broker.as_str(), s)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// What subscribers see on every publish.
///
/// `data` is shared between publishes that only change `status`; a new
/// `Arc` means the snapshot itself changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedState {
    pub status: ConnectionStatus,
    pub data: Arc<Snapshot>,
}

impl PublishedState {
    pub fn initial() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            data: Arc::new(Snapshot::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metrics(value: Value) -> BrokerMetrics {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_broker_metrics_keeps_unknown_fields() {
        let m = metrics(json!({"current_spread": 0.0002, "quality_score": 87.5, "is_frozen": false}));
        assert_eq!(m.current_spread(), Some(0.0002));
        assert_eq!(m.number("quality_score"), Some(87.5));
        assert_eq!(m.get("is_frozen"), Some(&json!(false)));
        assert_eq!(m.avg_spread(), None);
    }

    #[test]
    fn test_set_number_refuses_non_finite() {
        let mut m = metrics(json!({"current_spread": "n/a"}));
        assert!(!m.set_number(CURRENT_SPREAD, f64::INFINITY));
        assert_eq!(m.get(CURRENT_SPREAD), Some(&json!("n/a")));
        assert!(m.set_number(CURRENT_SPREAD, 0.5));
        assert_eq!(m.current_spread(), Some(0.5));
    }

    #[test]
    fn test_snapshot_lookup_and_counts() {
        let snapshot: Snapshot = serde_json::from_value(json!({
            "EURUSD": {
                "BrokerA": {"current_spread": 0.0002},
                "BrokerB": {"current_spread": 0.0001}
            },
            "GBPUSD": {"BrokerA": {}}
        }))
        .unwrap();

        assert_eq!(snapshot.symbol_count(), 2);
        assert_eq!(snapshot.record_count(), 3);
        assert!(snapshot.get("EURUSD", "BrokerB").is_some());
        assert!(snapshot.get("EURUSD", "BrokerZ").is_none());
        assert_eq!(snapshot.tightest_broker("EURUSD"), Some(("BrokerB", 0.0001)));
        assert_eq!(snapshot.tightest_broker("GBPUSD"), None);
    }

    #[test]
    fn test_published_state_wire_shape() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("EURUSD", "BrokerA", metrics(json!({"current_spread": 0.0015})));
        let state = PublishedState {
            status: ConnectionStatus::Disconnected,
            data: Arc::new(snapshot),
        };

        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({
                "status": "disconnected",
                "data": {"EURUSD": {"BrokerA": {"current_spread": 0.0015}}}
            })
        );
    }
}
