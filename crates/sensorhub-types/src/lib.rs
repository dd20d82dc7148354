//! Platform-agnostic types for gateway-pushed temperature/humidity readings.
//!
//! This crate provides the shared vocabulary used by the store
//! (sensorhub-store) and the ingestion service (sensorhub-service).
//!
//! # Features
//!
//! - [`SensorReading`], the decoded measurement tuple
//! - [`RawItem`] decoding and validation for gateway JSON batches
//! - [`WindowSpec`] parsing for fixed aggregation windows (`5m`, `1h`)
//! - Error types for item and window parsing
//!
//! # Example
//!
//! ```
//! use sensorhub_types::{RawItem, RawTimestamp, WindowSpec};
//! use time::OffsetDateTime;
//!
//! let item = RawItem {
//!     kind: Some("MST01".into()),
//!     mac: Some("AA:BB:CC:DD:EE:FF".into()),
//!     timestamp: Some(RawTimestamp::Text("2024-05-01T12:00:00Z".into())),
//!     temperature: Some(21.5),
//!     humidity: Some(40.0),
//!     ..Default::default()
//! };
//! let reading = item.into_reading(&["MST01".to_string()], OffsetDateTime::now_utc())?;
//! assert_eq!(reading.sensor_id, "aa:bb:cc:dd:ee:ff");
//!
//! let window: WindowSpec = "5m".parse()?;
//! assert_eq!(window.label(), "5m");
//! # Ok::<(), sensorhub_types::ParseError>(())
//! ```

pub mod error;
pub mod item;
pub mod reading;
pub mod window;

pub use error::{ParseError, ParseResult};
pub use item::{MST01, RawItem, RawTimestamp};
pub use reading::{
    SensorReading, normalize_sensor_id, truncate_to_millisecond, truncate_to_second,
};
pub use window::WindowSpec;
