//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use sensorhub_types::{SensorReading, truncate_to_millisecond};

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Database row ID.
    pub id: i64,
    /// Sensor identifier.
    pub sensor_id: String,
    /// When the reading was taken, at millisecond resolution.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Temperature in Celsius.
    pub temperature: f64,
    /// Relative humidity percentage.
    pub humidity: Option<f64>,
    /// Raw diagnostic payload as hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_hex: Option<String>,
}

impl Reading {
    /// Pair a decoded reading with the row id it was stored under.
    ///
    /// The timestamp is cut to the precision the store keeps.
    pub fn from_sensor_reading(id: i64, reading: &SensorReading) -> Self {
        Self {
            id,
            sensor_id: reading.sensor_id.clone(),
            timestamp: truncate_to_millisecond(reading.timestamp),
            temperature: reading.temperature,
            humidity: reading.humidity,
            raw_hex: reading.raw_hex.clone(),
        }
    }
}

/// A reading joined with its sensor's display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedReading {
    #[serde(flatten)]
    pub reading: Reading,
    pub display_name: Option<String>,
}

/// User-assigned label for a sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorName {
    pub sensor_id: String,
    pub display_name: Option<String>,
}

/// Values of a sensor's most recent reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestValues {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub temperature: f64,
    pub humidity: Option<f64>,
}

/// Arithmetic means over every stored reading of a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanValues {
    pub temperature: f64,
    /// `None` when no reading of the sensor carried humidity.
    pub humidity: Option<f64>,
}

/// One row of the per-sensor dashboard summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSummary {
    pub sensor_id: String,
    pub display_name: Option<String>,
    pub latest: LatestValues,
    pub mean: MeanValues,
}

/// An aggregate about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAggregate {
    /// Sensor identifier.
    pub sensor_id: String,
    /// Window token (`5m`, `1h`) or checkpoint label.
    pub window_label: String,
    /// Lower bound of the covered range; `None` means all history.
    pub window_start: Option<OffsetDateTime>,
    /// Upper bound of the covered range.
    pub window_end: OffsetDateTime,
    /// Timestamp of the newest reading in the range.
    pub last_reading_at: OffsetDateTime,
    pub last_temperature: f64,
    pub last_humidity: Option<f64>,
    pub mean_temperature: f64,
    pub mean_humidity: Option<f64>,
    /// Number of readings folded in; zero for a sentinel.
    pub sample_count: u32,
    /// True when written for an interval without new readings.
    pub sentinel: bool,
    pub computed_at: OffsetDateTime,
}

/// An aggregate record stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// Database row ID.
    pub id: i64,
    pub sensor_id: String,
    pub window_label: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub window_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub window_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_reading_at: OffsetDateTime,
    pub last_temperature: f64,
    pub last_humidity: Option<f64>,
    pub mean_temperature: f64,
    pub mean_humidity: Option<f64>,
    pub sample_count: u32,
    pub sentinel: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
}

impl AggregateRecord {
    /// Attach the row id assigned on insert.
    pub fn from_new(id: i64, record: &NewAggregate) -> Self {
        Self {
            id,
            sensor_id: record.sensor_id.clone(),
            window_label: record.window_label.clone(),
            window_start: record.window_start,
            window_end: record.window_end,
            last_reading_at: record.last_reading_at,
            last_temperature: record.last_temperature,
            last_humidity: record.last_humidity,
            mean_temperature: record.mean_temperature,
            mean_humidity: record.mean_humidity,
            sample_count: record.sample_count,
            sentinel: record.sentinel,
            computed_at: record.computed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_reading_from_sensor_reading() {
        let decoded = SensorReading::new(
            "aa:01",
            datetime!(2024-05-01 12:00:00.250_999 UTC),
            21.5,
            Some(40.0),
        )
        .with_raw_hex("ff00");
        let stored = Reading::from_sensor_reading(7, &decoded);

        assert_eq!(stored.id, 7);
        assert_eq!(stored.sensor_id, "aa:01");
        assert_eq!(stored.timestamp, datetime!(2024-05-01 12:00:00.250 UTC));
        assert_eq!(stored.humidity, Some(40.0));
        assert_eq!(stored.raw_hex.as_deref(), Some("ff00"));
    }

    #[test]
    fn test_named_reading_serializes_flat() {
        let named = NamedReading {
            reading: Reading {
                id: 1,
                sensor_id: "aa:01".to_string(),
                timestamp: datetime!(2024-05-01 12:00 UTC),
                temperature: 20.0,
                humidity: None,
                raw_hex: None,
            },
            display_name: Some("Kitchen".to_string()),
        };

        let json = serde_json::to_value(&named).unwrap();
        assert_eq!(json["sensor_id"], "aa:01");
        assert_eq!(json["display_name"], "Kitchen");
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
        assert!(json.get("raw_hex").is_none());
    }

    #[test]
    fn test_aggregate_record_from_new() {
        let new = NewAggregate {
            sensor_id: "s1".to_string(),
            window_label: "5m".to_string(),
            window_start: None,
            window_end: datetime!(2024-05-01 12:05 UTC),
            last_reading_at: datetime!(2024-05-01 12:04 UTC),
            last_temperature: 22.0,
            last_humidity: Some(50.0),
            mean_temperature: 21.0,
            mean_humidity: Some(49.0),
            sample_count: 3,
            sentinel: false,
            computed_at: datetime!(2024-05-01 12:05 UTC),
        };

        let record = AggregateRecord::from_new(42, &new);
        assert_eq!(record.id, 42);
        assert_eq!(record.sample_count, 3);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json["window_start"].is_null());
        assert_eq!(json["window_label"], "5m");
    }
}
