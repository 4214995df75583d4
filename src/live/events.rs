// =============================================================================
// Live Events — typed payloads carried by the tick and order channels
// =============================================================================
//
// Wire names follow the upstream feed (`instrument_token`, `ltp`). The feed is
// loose about a few encodings, so decoding accepts:
//   - `instrument_token` as a string or an integer,
//   - `timestamp` as an RFC 3339 string or epoch seconds (float or integer).
// Anything else is a schema mismatch and the whole frame is rejected.
// =============================================================================

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::OrderStatus;

/// A last-traded-price update for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    #[serde(rename = "instrument_token", deserialize_with = "de_instrument_key")]
    pub instrument_key: String,
    #[serde(rename = "ltp")]
    pub last_traded_price: f64,
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A status change for one order. Treated as a display hint only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Field decoders
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyRepr {
    Text(String),
    Int(i64),
}

fn de_instrument_key<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match KeyRepr::deserialize(deserializer)? {
        KeyRepr::Text(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        KeyRepr::Text(_) => Err(serde::de::Error::custom("empty instrument key")),
        KeyRepr::Int(n) => Ok(n.to_string()),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Rfc3339(DateTime<Utc>),
    Epoch(f64),
}

impl TimestampRepr {
    fn into_datetime<E: serde::de::Error>(self) -> Result<DateTime<Utc>, E> {
        match self {
            Self::Rfc3339(dt) => Ok(dt),
            Self::Epoch(secs) if secs.is_finite() && secs >= 0.0 => {
                let whole = secs.trunc() as i64;
                let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
                Utc.timestamp_opt(whole, nanos.min(999_999_999))
                    .single()
                    .ok_or_else(|| E::custom("epoch timestamp out of range"))
            }
            Self::Epoch(_) => Err(E::custom("invalid epoch timestamp")),
        }
    }
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    TimestampRepr::deserialize(deserializer)?.into_datetime()
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<TimestampRepr>::deserialize(deserializer)? {
        Some(repr) => repr.into_datetime().map(Some),
        None => Ok(None),
    }
}
