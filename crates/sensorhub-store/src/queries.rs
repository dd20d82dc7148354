//! Query builders for readings and aggregates.
//!
//! Both [`ReadingQuery`] and [`AggregateQuery`] follow the builder pattern
//! and default to newest-first ordering.
//!
//! # Example
//!
//! ```
//! use sensorhub_store::{AggregateQuery, ReadingQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = ReadingQuery::new()
//!     .sensor("aa:bb:cc:dd:ee:ff")
//!     .since(yesterday)
//!     .limit(50);
//! let readings = store.query_readings(&query)?;
//!
//! let aggregates = store.query_aggregates(&AggregateQuery::new().window("5m"))?;
//! # Ok::<(), sensorhub_store::Error>(())
//! ```

use time::OffsetDateTime;

use crate::store::to_millis;

const READING_COLUMNS: &str = "id, sensor_id, timestamp, temperature, humidity, raw_hex";

pub(crate) const AGGREGATE_COLUMNS: &str = "id, sensor_id, window_label, window_start, \
     window_end, last_reading_at, last_temperature, last_humidity, mean_temperature, \
     mean_humidity, sample_count, sentinel, computed_at";

type Params = Vec<Box<dyn rusqlite::ToSql>>;

fn where_clause(conditions: &[&str]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

fn push_paging(sql: &mut String, limit: Option<u32>, offset: Option<u32>) {
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = offset {
        // SQLite only accepts OFFSET after a LIMIT
        if limit.is_none() {
            sql.push_str(" LIMIT -1");
        }
        sql.push_str(&format!(" OFFSET {}", offset));
    }
}

/// Fluent query builder for stored readings.
///
/// Use this to construct queries for [`Store::query_readings`](crate::Store::query_readings).
/// `since`/`until` are inclusive, `after` is exclusive. Bounds are compared
/// at millisecond resolution.
///
/// ```
/// use sensorhub_store::ReadingQuery;
/// use time::{Duration, OffsetDateTime};
///
/// let now = OffsetDateTime::now_utc();
///
/// // Everything one sensor reported in the last hour, in order
/// let query = ReadingQuery::new()
///     .sensor("aa:bb:cc:dd:ee:ff")
///     .since(now - Duration::hours(1))
///     .oldest_first();
/// ```
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by sensor ID.
    pub sensor_id: Option<String>,
    /// Include readings at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Include readings strictly after this time.
    pub after: Option<OffsetDateTime>,
    /// Include readings at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by timestamp descending (newest first).
    pub newest_first: bool,
}

impl ReadingQuery {
    /// Create a new query: all sensors, no bounds, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only include readings from the specified sensor.
    pub fn sensor(mut self, sensor_id: &str) -> Self {
        self.sensor_id = Some(sensor_id.to_string());
        self
    }

    /// Filter to readings taken at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to readings taken strictly after this time.
    pub fn after(mut self, time: OffsetDateTime) -> Self {
        self.after = Some(time);
        self
    }

    /// Filter to readings taken at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results chronologically.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Params) {
        let mut conditions = Vec::new();
        let mut params: Params = Vec::new();

        if let Some(ref sensor_id) = self.sensor_id {
            conditions.push("sensor_id = ?");
            params.push(Box::new(sensor_id.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("timestamp >= ?");
            params.push(Box::new(to_millis(since)));
        }

        if let Some(after) = self.after {
            conditions.push("timestamp > ?");
            params.push(Box::new(to_millis(after)));
        }

        if let Some(until) = self.until {
            conditions.push("timestamp <= ?");
            params.push(Box::new(to_millis(until)));
        }

        (where_clause(&conditions), params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        // Row id breaks ties between readings sharing a timestamp
        let mut sql = format!(
            "SELECT {} FROM readings {} ORDER BY timestamp {}, id {}",
            READING_COLUMNS, where_clause, order, order
        );
        push_paging(&mut sql, self.limit, self.offset);
        sql
    }
}

/// Fluent query builder for aggregate records.
///
/// Time bounds apply to `computed_at` and are inclusive.
#[derive(Debug, Default, Clone)]
pub struct AggregateQuery {
    /// Filter by sensor ID.
    pub sensor_id: Option<String>,
    /// Filter by window label (`5m`, `checkpoint`, ...).
    pub window_label: Option<String>,
    /// Include records computed at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Include records computed at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Order by computed_at descending.
    pub newest_first: bool,
}

impl AggregateQuery {
    /// Create a new query: every record, oldest first.
    ///
    /// Export is the main consumer, so chronological order is the default.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sensor(mut self, sensor_id: &str) -> Self {
        self.sensor_id = Some(sensor_id.to_string());
        self
    }

    pub fn window(mut self, label: &str) -> Self {
        self.window_label = Some(label.to_string());
        self
    }

    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Params) {
        let mut conditions = Vec::new();
        let mut params: Params = Vec::new();

        if let Some(ref sensor_id) = self.sensor_id {
            conditions.push("sensor_id = ?");
            params.push(Box::new(sensor_id.clone()));
        }

        if let Some(ref label) = self.window_label {
            conditions.push("window_label = ?");
            params.push(Box::new(label.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("computed_at >= ?");
            params.push(Box::new(to_millis(since)));
        }

        if let Some(until) = self.until {
            conditions.push("computed_at <= ?");
            params.push(Box::new(to_millis(until)));
        }

        (where_clause(&conditions), params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT {} FROM aggregate_records {} ORDER BY computed_at {}, id {}",
            AGGREGATE_COLUMNS, where_clause, order, order
        );
        push_paging(&mut sql, self.limit, None);
        sql
    }
}
