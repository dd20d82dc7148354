//! Decoded sensor readings.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// A single decoded temperature/humidity measurement, ready to be stored.
///
/// This is the tuple every decoder (gateway JSON or raw radio packet)
/// produces. Identifiers are expected to be normalized with
/// [`normalize_sensor_id`] before the reading is constructed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorReading {
    /// Sensor identifier (lower-cased MAC or transmitter id).
    pub sensor_id: String,
    /// When the reading was taken (sensor-supplied or ingestion time).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Temperature in Celsius.
    pub temperature: f64,
    /// Relative humidity percentage, if the sensor reports it.
    pub humidity: Option<f64>,
    /// Raw diagnostic payload as hex, if the decoder kept it.
    pub raw_hex: Option<String>,
}

impl SensorReading {
    /// Create a reading without a raw payload.
    pub fn new(
        sensor_id: impl Into<String>,
        timestamp: OffsetDateTime,
        temperature: f64,
        humidity: Option<f64>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp,
            temperature,
            humidity,
            raw_hex: None,
        }
    }

    /// Attach the raw diagnostic payload.
    #[must_use]
    pub fn with_raw_hex(mut self, raw_hex: impl Into<String>) -> Self {
        self.raw_hex = Some(raw_hex.into());
        self
    }
}

/// Normalize a sensor identifier for storage and comparison.
///
/// Gateways report the same MAC in mixed case depending on firmware, so
/// identifiers are trimmed and lower-cased.
///
/// ```
/// use sensorhub_types::normalize_sensor_id;
///
/// assert_eq!(normalize_sensor_id(" AA:BB:CC:DD:EE:FF "), "aa:bb:cc:dd:ee:ff");
/// ```
#[must_use]
pub fn normalize_sensor_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Drop the sub-second part of a timestamp.
///
/// Aggregation bounds and checkpoints are taken at whole seconds.
#[must_use]
pub fn truncate_to_second(instant: OffsetDateTime) -> OffsetDateTime {
    instant - Duration::nanoseconds(i64::from(instant.nanosecond()))
}

/// Drop the sub-millisecond part of a timestamp, the precision readings are
/// stored at.
#[must_use]
pub fn truncate_to_millisecond(instant: OffsetDateTime) -> OffsetDateTime {
    instant - Duration::nanoseconds(i64::from(instant.nanosecond() % 1_000_000))
}
