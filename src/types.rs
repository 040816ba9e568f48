use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Label used when a snapshot carries no regime information
pub const UNKNOWN_REGIME: &str = "UNKNOWN";

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One tick of bot state.
///
/// Everything except `timestamp` is opaque to the feed and is passed
/// through verbatim. The aggregator reads `signal`, `edge.edgeUp`,
/// `edge.edgeDown` and `regime` when they are present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Assigned by the store at insertion time (ms since epoch)
    pub timestamp: i64,
    /// Insertion order, assigned by the store. Not sent to clients.
    #[serde(skip)]
    pub sequence: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Snapshot {
    /// Build a snapshot from a raw producer payload, overriding any
    /// producer-supplied timestamp. Non-object payloads are wrapped as
    /// `{"value": payload}`.
    pub fn stamped(raw: Value, timestamp: i64) -> Self {
        let mut fields = match raw {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        fields.remove("timestamp");

        Self {
            timestamp,
            sequence: 0,
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn signal(&self) -> Signal {
        Signal::from_label(self.get("signal").and_then(Value::as_str))
    }

    pub fn edge_up(&self) -> Option<f64> {
        self.edge_value("edgeUp")
    }

    pub fn edge_down(&self) -> Option<f64> {
        self.edge_value("edgeDown")
    }

    /// Regime label: `regime`, then `indicators.regime`, then "UNKNOWN"
    pub fn regime(&self) -> &str {
        self.get("regime")
            .and_then(Value::as_str)
            .filter(|label| !label.is_empty())
            .or_else(|| {
                self.get("indicators")
                    .and_then(|indicators| indicators.get("regime"))
                    .and_then(Value::as_str)
                    .filter(|label| !label.is_empty())
            })
            .unwrap_or(UNKNOWN_REGIME)
    }

    // Only finite JSON numbers count; strings, nulls and nested values do not
    fn edge_value(&self, key: &str) -> Option<f64> {
        self.get("edge")
            .and_then(|edge| edge.get(key))
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
    }
}

/// Trade decision carried by a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    BuyUp,
    BuyDown,
    NoTrade,
}

impl Signal {
    /// Classify a raw label. Missing or unrecognized labels are `NoTrade`.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some("BUY UP") => Self::BuyUp,
            Some("BUY DOWN") => Self::BuyDown,
            _ => Self::NoTrade,
        }
    }
}

/// Messages pushed to dashboard clients over the live channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsMessage<'a> {
    /// Full resync sent once on connect
    Snapshot { data: &'a Snapshot },
    Update { data: &'a Snapshot, timestamp: i64 },
    Pong { timestamp: i64 },
}

/// Messages accepted from dashboard clients
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ping,
    #[serde(other)]
    Unknown,
}
