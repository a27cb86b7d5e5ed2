use serde::Deserialize;
use serde_json::Value;

use crate::state::snapshot::Snapshot;

pub const FULL_ANALYSIS: &str = "full_analysis";
pub const SPREAD_UPDATE: &str = "spread_update";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("frame holds no json value")]
    EmptyFrame,

    #[error("message is not a json object")]
    NotAnObject,

    #[error("unknown message type {0}")]
    UnknownType(String),

    #[error("malformed {kind} message: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Single incremental refresh of one broker's current spread, in pips.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpreadUpdate {
    pub symbol: String,
    pub broker: String,
    pub current_spread: f64,
}

#[derive(Debug, Deserialize)]
struct FullAnalysisBody {
    #[serde(default)]
    payload: Option<Snapshot>,
}

/// A decoded server push.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Complete table in pips; replaces the snapshot after normalization.
    FullAnalysis { payload: Snapshot },
    SpreadUpdate(SpreadUpdate),
    /// Untyped message from the previous protocol version: the body is the
    /// table itself, already in price units.
    Legacy { payload: Snapshot },
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::FullAnalysis { .. } => FULL_ANALYSIS,
            InboundMessage::SpreadUpdate(_) => SPREAD_UPDATE,
            InboundMessage::Legacy { .. } => "legacy",
        }
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let tag = match &value {
            Value::Object(object) => object.get("type").cloned(),
            _ => return Err(ProtocolError::NotAnObject),
        };

        match tag {
            None => {
                let payload = serde_json::from_value(value).map_err(|source| {
                    ProtocolError::Malformed {
                        kind: "legacy",
                        source,
                    }
                })?;
                Ok(InboundMessage::Legacy { payload })
            }
            Some(Value::String(t)) if t == FULL_ANALYSIS => {
                let body: FullAnalysisBody =
                    serde_json::from_value(value).map_err(|source| ProtocolError::Malformed {
                        kind: FULL_ANALYSIS,
                        source,
                    })?;
                Ok(InboundMessage::FullAnalysis {
                    payload: body.payload.unwrap_or_default(),
                })
            }
            Some(Value::String(t)) if t == SPREAD_UPDATE => {
                let update = serde_json::from_value(value).map_err(|source| {
                    ProtocolError::Malformed {
                        kind: SPREAD_UPDATE,
                        source,
                    }
                })?;
                Ok(InboundMessage::SpreadUpdate(update))
            }
            Some(Value::String(t)) => Err(ProtocolError::UnknownType(t)),
            Some(other) => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// Decode every JSON value in a text frame, in order.
///
/// A frame holds one value or several newline-separated ones. Iteration stops
/// after the first syntax error since the rest of the frame can't be located.
/// A blank frame yields a single `EmptyFrame` error.
pub fn decode_frame(text: &str) -> impl Iterator<Item = Result<InboundMessage, ProtocolError>> + '_ {
    let blank = text.trim().is_empty();
    let mut values = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    let mut failed = blank;

    let empty = blank.then_some(Err(ProtocolError::EmptyFrame));
    empty.into_iter().chain(std::iter::from_fn(move || {
        if failed {
            return None;
        }
        match values.next()? {
            Ok(value) => Some(InboundMessage::from_value(value)),
            Err(err) => {
                failed = true;
                Some(Err(ProtocolError::InvalidJson(err)))
            }
        }
    }))
}
