use serde_json::Value;
use tracing::debug;

use crate::market_data::types::{InboundMessage, SpreadUpdate};
use crate::state::snapshot::{BrokerMetrics, CURRENT_SPREAD, SPREAD_FIELDS, Snapshot};

/// Result of applying one message to the current snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// The message carried a whole table.
    Replaced(Snapshot),
    /// One record's `current_spread` changed.
    Patched(Snapshot),
    /// Nothing to do; the current snapshot stays as it is.
    Unchanged,
}

/// Merges decoded messages into a snapshot and converts pips to price units.
///
/// Never mutates its inputs: every change produces a new `Snapshot`, so a
/// subscriber still holding the previous one sees it unchanged.
#[derive(Debug, Clone)]
pub struct Reconciler {
    divisor: f64,
}

impl Reconciler {
    pub fn new(divisor: f64) -> Self {
        Self { divisor }
    }

    pub fn divisor(&self) -> f64 {
        self.divisor
    }

    pub fn apply(&self, current: &Snapshot, message: &InboundMessage) -> Reconciled {
        match message {
            InboundMessage::FullAnalysis { payload } => Reconciled::Replaced(self.normalize(payload)),
            InboundMessage::Legacy { payload } => Reconciled::Replaced(payload.clone()),
            InboundMessage::SpreadUpdate(update) => self.patch(current, update),
        }
    }

    /// Deep copy of `payload` with every spread field divided by the divisor.
    pub fn normalize(&self, payload: &Snapshot) -> Snapshot {
        let mut normalized = payload.clone();
        for record in normalized.records_mut() {
            self.normalize_record(record);
        }
        normalized
    }

    fn normalize_record(&self, record: &mut BrokerMetrics) {
        for field in SPREAD_FIELDS {
            let Some(raw) = record.get(field).and_then(parse_pips) else {
                continue;
            };
            // Non-finite results can't be stored; the raw value stays.
            record.set_number(field, raw / self.divisor);
        }
    }

    fn patch(&self, current: &Snapshot, update: &SpreadUpdate) -> Reconciled {
        if current.get(&update.symbol, &update.broker).is_none() {
            debug!(
                symbol = %update.symbol,
                broker = %update.broker,
                "spread update for unknown record dropped"
            );
            return Reconciled::Unchanged;
        }

        let mut next = current.clone();
        let applied = next
            .get_mut(&update.symbol, &update.broker)
            .is_some_and(|record| record.set_number(CURRENT_SPREAD, update.current_spread / self.divisor));

        if applied {
            Reconciled::Patched(next)
        } else {
            Reconciled::Unchanged
        }
    }
}

/// Numeric reading of a raw spread field. Strings are read up to the end of
/// their leading number, so `"150 pips"` is 150; everything else is left for
/// the caller to keep as-is.
fn parse_pips(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_float_prefix(s)?,
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

/// Longest decimal literal at the start of `s` (after leading whitespace):
/// optional sign, digits with an optional fraction, optional exponent.
fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let int_end = digits_from(end);
    let mut mantissa_digits = int_end - end;
    end = int_end;

    // A dot with no fraction digits after it ("5.") stays out of the slice.
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        if frac_end > end + 1 {
            mantissa_digits += frac_end - end - 1;
            end = frac_end;
        }
    }
    if mantissa_digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok()
}
