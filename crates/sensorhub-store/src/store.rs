//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use sensorhub_types::SensorReading;

use crate::error::{Error, Result};
use crate::models::{
    AggregateRecord, LatestValues, MeanValues, NamedReading, NewAggregate, Reading, SensorName,
    SensorSummary,
};
use crate::queries::{AGGREGATE_COLUMNS, AggregateQuery, ReadingQuery};
use crate::schema;

/// SQLite-based store for sensor readings and aggregates.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

/// Instants are stored as Unix milliseconds. Sub-millisecond precision is
/// dropped, rounding towards the past.
pub(crate) fn to_millis(instant: OffsetDateTime) -> i64 {
    // Every representable OffsetDateTime fits in i64 milliseconds
    instant.unix_timestamp_nanos().div_euclid(1_000_000) as i64
}

fn from_millis(ms: i64) -> std::result::Result<OffsetDateTime, time::error::ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
}

fn to_datetime(ms: i64) -> Result<OffsetDateTime> {
    from_millis(ms).map_err(|_| Error::InvalidTimestamp(ms))
}

fn column_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let ms: i64 = row.get(idx)?;
    from_millis(ms)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn column_opt_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => column_datetime(row, idx).map(Some),
        None => Ok(None),
    }
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<Reading> {
    Ok(Reading {
        id: row.get(0)?,
        sensor_id: row.get(1)?,
        timestamp: column_datetime(row, 2)?,
        temperature: row.get(3)?,
        humidity: row.get(4)?,
        raw_hex: row.get(5)?,
    })
}

fn aggregate_from_row(row: &Row<'_>) -> rusqlite::Result<AggregateRecord> {
    Ok(AggregateRecord {
        id: row.get(0)?,
        sensor_id: row.get(1)?,
        window_label: row.get(2)?,
        window_start: column_opt_datetime(row, 3)?,
        window_end: column_datetime(row, 4)?,
        last_reading_at: column_datetime(row, 5)?,
        last_temperature: row.get(6)?,
        last_humidity: row.get(7)?,
        mean_temperature: row.get(8)?,
        mean_humidity: row.get(9)?,
        sample_count: row.get(10)?,
        sentinel: row.get(11)?,
        computed_at: column_datetime(row, 12)?,
    })
}

fn insert_aggregate(conn: &Connection, record: &NewAggregate) -> Result<i64> {
    conn.execute(
        "INSERT INTO aggregate_records (sensor_id, window_label, window_start, window_end,
         last_reading_at, last_temperature, last_humidity, mean_temperature, mean_humidity,
         sample_count, sentinel, computed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            record.sensor_id,
            record.window_label,
            record.window_start.map(to_millis),
            to_millis(record.window_end),
            to_millis(record.last_reading_at),
            record.last_temperature,
            record.last_humidity,
            record.mean_temperature,
            record.mean_humidity,
            record.sample_count,
            record.sentinel,
            to_millis(record.computed_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Upsert that never moves a checkpoint backwards.
fn upsert_checkpoint(conn: &Connection, sensor_id: &str, at: OffsetDateTime) -> Result<()> {
    conn.execute(
        "INSERT INTO aggregator_checkpoints (sensor_id, last_aggregated_at) VALUES (?1, ?2)
         ON CONFLICT(sensor_id) DO UPDATE SET
            last_aggregated_at = MAX(last_aggregated_at, excluded.last_aggregated_at)",
        rusqlite::params![sensor_id, to_millis(at)],
    )?;
    Ok(())
}

// Reading operations
impl Store {
    /// Append a reading. Returns the new row id.
    ///
    /// The timestamp is kept at millisecond resolution.
    pub fn append_reading(&self, reading: &SensorReading) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO readings (sensor_id, timestamp, temperature, humidity, raw_hex)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                reading.sensor_id,
                to_millis(reading.timestamp),
                reading.temperature,
                reading.humidity,
                reading.raw_hex,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Stored reading {} for {}", id, reading.sensor_id);
        Ok(id)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map(params_ref.as_slice(), reading_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Get the latest reading for a sensor.
    pub fn latest_reading(&self, sensor_id: &str) -> Result<Option<Reading>> {
        let query = ReadingQuery::new().sensor(sensor_id).limit(1);
        let mut readings = self.query_readings(&query)?;
        Ok(readings.pop())
    }

    /// Count readings, optionally for one sensor.
    pub fn count_readings(&self, sensor_id: Option<&str>) -> Result<u64> {
        let count: i64 = match sensor_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE sensor_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count.max(0) as u64)
    }

    /// Most recent readings across all sensors, with display names.
    pub fn recent_readings(&self, limit: u32) -> Result<Vec<NamedReading>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.sensor_id, r.timestamp, r.temperature, r.humidity, r.raw_hex,
                    m.display_name
             FROM readings r
             LEFT JOIN sensor_metadata m ON m.sensor_id = r.sensor_id
             ORDER BY r.timestamp DESC, r.id DESC
             LIMIT ?",
        )?;

        let readings = stmt
            .query_map([limit], |row| {
                Ok(NamedReading {
                    reading: reading_from_row(row)?,
                    display_name: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Newest readings of one sensor, bounded by `limit`.
    pub fn history_for(&self, sensor_id: &str, limit: u32) -> Result<Vec<Reading>> {
        self.query_readings(&ReadingQuery::new().sensor(sensor_id).limit(limit))
    }

    /// One row per sensor with its latest reading and all-time means.
    ///
    /// Sensors without readings are omitted. Ties on the latest timestamp
    /// go to the reading stored last.
    pub fn summary_per_sensor(&self) -> Result<Vec<SensorSummary>> {
        let mut stmt = self.conn.prepare(
            "WITH ranked AS (
                SELECT sensor_id, timestamp, temperature, humidity,
                       ROW_NUMBER() OVER (
                           PARTITION BY sensor_id ORDER BY timestamp DESC, id DESC
                       ) AS rn,
                       AVG(temperature) OVER (PARTITION BY sensor_id) AS mean_temperature,
                       AVG(humidity) OVER (PARTITION BY sensor_id) AS mean_humidity
                FROM readings
             )
             SELECT r.sensor_id, m.display_name, r.timestamp, r.temperature, r.humidity,
                    r.mean_temperature, r.mean_humidity
             FROM ranked r
             LEFT JOIN sensor_metadata m ON m.sensor_id = r.sensor_id
             WHERE r.rn = 1
             ORDER BY r.sensor_id",
        )?;

        let summaries = stmt
            .query_map([], |row| {
                Ok(SensorSummary {
                    sensor_id: row.get(0)?,
                    display_name: row.get(1)?,
                    latest: LatestValues {
                        timestamp: column_datetime(row, 2)?,
                        temperature: row.get(3)?,
                        humidity: row.get(4)?,
                    },
                    mean: MeanValues {
                        temperature: row.get(5)?,
                        humidity: row.get(6)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(summaries)
    }
}

// Sensor metadata operations
impl Store {
    /// Set a sensor's display name. Last write wins.
    pub fn set_sensor_name(&self, sensor_id: &str, display_name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sensor_metadata (sensor_id, display_name) VALUES (?1, ?2)
             ON CONFLICT(sensor_id) DO UPDATE SET display_name = excluded.display_name",
            rusqlite::params![sensor_id, display_name],
        )?;
        debug!("Named sensor {} as {:?}", sensor_id, display_name);
        Ok(())
    }

    /// All stored sensor names.
    pub fn sensor_names(&self) -> Result<Vec<SensorName>> {
        let mut stmt = self
            .conn
            .prepare("SELECT sensor_id, display_name FROM sensor_metadata ORDER BY sensor_id")?;

        let names = stmt
            .query_map([], |row| {
                Ok(SensorName {
                    sensor_id: row.get(0)?,
                    display_name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(names)
    }

    /// Every sensor that has readings or a stored name.
    pub fn known_sensors(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT sensor_id FROM readings
             UNION
             SELECT sensor_id FROM sensor_metadata
             ORDER BY 1",
        )?;

        let sensors = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sensors)
    }
}

// Aggregate and checkpoint operations
impl Store {
    /// Append an aggregate record. Returns the new row id.
    pub fn append_aggregate(&self, record: &NewAggregate) -> Result<i64> {
        insert_aggregate(&self.conn, record)
    }

    /// Query aggregate records with filters.
    pub fn query_aggregates(&self, query: &AggregateQuery) -> Result<Vec<AggregateRecord>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_ref.as_slice(), aggregate_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Get one aggregate record by id.
    pub fn get_aggregate(&self, id: i64) -> Result<Option<AggregateRecord>> {
        let sql = format!("SELECT {} FROM aggregate_records WHERE id = ?", AGGREGATE_COLUMNS);
        let record = self
            .conn
            .query_row(&sql, [id], aggregate_from_row)
            .optional()?;
        Ok(record)
    }

    /// Get the aggregation checkpoint for a sensor.
    pub fn get_checkpoint(&self, sensor_id: &str) -> Result<Option<OffsetDateTime>> {
        let ts: Option<i64> = self
            .conn
            .query_row(
                "SELECT last_aggregated_at FROM aggregator_checkpoints WHERE sensor_id = ?",
                [sensor_id],
                |row| row.get(0),
            )
            .optional()?;

        ts.map(to_datetime).transpose()
    }

    /// Advance a sensor's checkpoint. Earlier instants are ignored.
    pub fn set_checkpoint(&self, sensor_id: &str, at: OffsetDateTime) -> Result<()> {
        upsert_checkpoint(&self.conn, sensor_id, at)
    }

    /// Write a checkpoint-mode record and advance the checkpoint to its
    /// `window_end`, atomically.
    pub fn commit_checkpoint_run(&mut self, record: &NewAggregate) -> Result<AggregateRecord> {
        let tx = self.conn.transaction()?;
        let id = insert_aggregate(&tx, record)?;
        upsert_checkpoint(&tx, &record.sensor_id, record.window_end)?;
        tx.commit()?;

        debug!(
            "Checkpoint for {} advanced to {}",
            record.sensor_id, record.window_end
        );
        Ok(AggregateRecord::from_new(id, record))
    }
}
