//! Database schema and migrations.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        // Fresh database - create all tables
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1): readings, names, aggregates and
/// checkpoints. All timestamps are Unix milliseconds.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Raw readings (append-only)
        CREATE TABLE IF NOT EXISTS readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sensor_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            temperature REAL NOT NULL,
            humidity REAL,
            raw_hex TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_readings_sensor_time
            ON readings(sensor_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_readings_time
            ON readings(timestamp);

        -- Display names (one row per sensor, last write wins)
        CREATE TABLE IF NOT EXISTS sensor_metadata (
            sensor_id TEXT PRIMARY KEY,
            display_name TEXT
        );

        -- Aggregation runs (append-only audit trail)
        CREATE TABLE IF NOT EXISTS aggregate_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sensor_id TEXT NOT NULL,
            window_label TEXT NOT NULL,
            last_reading_at INTEGER NOT NULL,
            last_temperature REAL NOT NULL,
            last_humidity REAL,
            mean_temperature REAL NOT NULL,
            mean_humidity REAL,
            window_start INTEGER,
            window_end INTEGER NOT NULL,
            sample_count INTEGER NOT NULL,
            sentinel INTEGER NOT NULL DEFAULT 0,
            computed_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_aggregates_computed
            ON aggregate_records(computed_at);
        CREATE INDEX IF NOT EXISTS idx_aggregates_sensor
            ON aggregate_records(sensor_id, computed_at);

        -- Last instant covered by checkpoint aggregation, per sensor
        CREATE TABLE IF NOT EXISTS aggregator_checkpoints (
            sensor_id TEXT PRIMARY KEY,
            last_aggregated_at INTEGER NOT NULL
        );
        "#,
    )?;

    Ok(())
}
