//! Local persistence for gateway-pushed sensor readings.
//!
//! This crate provides SQLite-based storage for raw readings, sensor display
//! names, aggregate records and per-sensor aggregation checkpoints.
//!
//! # Features
//!
//! - Append-only readings at millisecond resolution
//! - Dashboard queries: recent readings, per-sensor history and summaries
//! - Aggregate records with window bounds and sentinel marking
//! - Monotonic checkpoints, committed together with their aggregate record
//! - CSV export of aggregates
//!
//! # Example
//!
//! ```no_run
//! use sensorhub_store::{ReadingQuery, Store, default_db_path};
//!
//! let store = Store::open(default_db_path())?;
//!
//! let query = ReadingQuery::new()
//!     .sensor("aa:bb:cc:dd:ee:ff")
//!     .limit(10);
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), sensorhub_store::Error>(())
//! ```

mod error;
mod export;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use export::write_aggregates_csv;
pub use models::{
    AggregateRecord, LatestValues, MeanValues, NamedReading, NewAggregate, Reading, SensorName,
    SensorSummary,
};
pub use queries::{AggregateQuery, ReadingQuery};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/sensorhub/data.db`
/// - macOS: `~/Library/Application Support/sensorhub/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\sensorhub\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("sensorhub")
        .join("data.db")
}
