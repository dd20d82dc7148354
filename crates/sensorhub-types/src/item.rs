//! Gateway item decoding.
//!
//! Sensor gateways POST JSON arrays of items shaped like:
//!
//! ```json
//! [{"type": "MST01", "mac": "AA:BB:CC:DD:EE:FF", "timestamp": "2024-05-01T12:00:00Z",
//!   "temperature": 21.4, "humidity": 48.0, "rssi": -71}]
//! ```
//!
//! [`RawItem`] mirrors that shape loosely (every field optional) so a single
//! malformed item can be rejected on its own instead of failing the whole
//! batch. Keys it does not model, such as `rssi`, are ignored whatever their
//! value. [`RawItem::into_reading`] performs the structural validation.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{ParseError, ParseResult};
use crate::reading::{SensorReading, normalize_sensor_id};

/// Item type emitted by MST01 temperature/humidity tags.
pub const MST01: &str = "MST01";

/// One item of a gateway batch, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawItem {
    /// Device type reported by the gateway (e.g. `MST01`).
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: Option<String>,
    /// Sensor MAC address or identifier.
    #[cfg_attr(feature = "serde", serde(alias = "sensorId", alias = "sensor_id"))]
    pub mac: Option<String>,
    /// When the sensor took the reading.
    pub timestamp: Option<RawTimestamp>,
    /// Temperature in Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity percentage.
    pub humidity: Option<f64>,
    /// Raw advertisement payload as hex.
    #[cfg_attr(feature = "serde", serde(alias = "rawHex"))]
    pub raw_hex: Option<String>,
}

/// A timestamp as gateways send it: either RFC 3339 text or Unix milliseconds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum RawTimestamp {
    /// Milliseconds since the Unix epoch.
    Millis(i64),
    /// RFC 3339 text, or decimal milliseconds sent as a string.
    Text(String),
}

impl RawTimestamp {
    /// Interpret the timestamp as a UTC instant.
    pub fn to_datetime(&self) -> ParseResult<OffsetDateTime> {
        match self {
            RawTimestamp::Millis(ms) => from_millis(*ms),
            RawTimestamp::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return from_millis(ms);
                }
                OffsetDateTime::parse(text, &Rfc3339)
                    .map_err(|_| ParseError::InvalidTimestamp(text.to_string()))
            }
        }
    }
}

fn from_millis(ms: i64) -> ParseResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|_| ParseError::InvalidTimestamp(ms.to_string()))
}

impl RawItem {
    /// Validate the item and turn it into a storable reading.
    ///
    /// `accepted_types` lists the item types to keep (case-insensitive); an
    /// empty slice accepts any type, including items without one.
    /// `received_at` is used when the item carries no timestamp.
    ///
    /// The sensor id is normalized. The timestamp is kept exactly as
    /// received, so two readings only share a duplicate key when they are
    /// the same transmission.
    pub fn into_reading(
        self,
        accepted_types: &[String],
        received_at: OffsetDateTime,
    ) -> ParseResult<SensorReading> {
        if !accepted_types.is_empty() {
            let kind = self.kind.as_deref().ok_or(ParseError::MissingField("type"))?;
            if !accepted_types.iter().any(|t| t.eq_ignore_ascii_case(kind)) {
                return Err(ParseError::UnsupportedType(kind.to_string()));
            }
        }

        let sensor_id = self
            .mac
            .as_deref()
            .map(normalize_sensor_id)
            .filter(|id| !id.is_empty())
            .ok_or(ParseError::MissingField("mac"))?;
        let temperature = self
            .temperature
            .ok_or(ParseError::MissingField("temperature"))?;
        let humidity = self.humidity.ok_or(ParseError::MissingField("humidity"))?;

        let timestamp = match &self.timestamp {
            Some(raw) => raw.to_datetime()?,
            None => received_at,
        };

        Ok(SensorReading {
            sensor_id,
            timestamp,
            temperature,
            humidity: Some(humidity),
            raw_hex: self.raw_hex,
        })
    }
}
