//! Windowed and checkpoint-based aggregation of stored readings.
//!
//! Two modes are supported:
//!
//! - **Fixed window** ([`aggregate_window`]): summarize the readings taken in
//!   the last `5m`, `1h`, ... and label the record with that token.
//! - **Checkpoint** ([`aggregate_from_checkpoint`]): summarize everything that
//!   arrived since the sensor's previous checkpoint run, then advance the
//!   checkpoint. Every reading is folded into exactly one non-sentinel
//!   checkpoint record, provided it was stored before the run that covers its
//!   timestamp.
//!
//! The free functions do the work against a [`Store`]; [`Aggregator`] wraps
//! them for the service, serializing checkpoint runs per sensor and
//! publishing written records to live viewers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use sensorhub_store::{AggregateRecord, NewAggregate, Reading, ReadingQuery, Store};
use sensorhub_types::{ParseError, WindowSpec, truncate_to_second};

use crate::state::{AppState, LiveEvent};

/// Label used for checkpoint runs when none is given.
pub const CHECKPOINT_LABEL: &str = "checkpoint";

/// Aggregation errors.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("{0}")]
    InvalidWindowSpec(#[from] ParseError),
    #[error("Storage error: {0}")]
    Storage(#[from] sensorhub_store::Error),
}

/// Result of one checkpoint run.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    /// New readings were summarized and the checkpoint advanced.
    Written(AggregateRecord),
    /// No new readings; the latest earlier reading was recorded again and
    /// the checkpoint advanced.
    Sentinel(AggregateRecord),
    /// The sensor has no readings at all. Nothing was written.
    NoData,
}

impl AggregateOutcome {
    pub fn record(&self) -> Option<&AggregateRecord> {
        match self {
            Self::Written(record) | Self::Sentinel(record) => Some(record),
            Self::NoData => None,
        }
    }

    pub fn status(&self) -> BulkStatus {
        match self {
            Self::Written(_) => BulkStatus::Aggregated,
            Self::Sentinel(_) => BulkStatus::Sentinel,
            Self::NoData => BulkStatus::NoData,
        }
    }
}

struct Summary<'a> {
    last: &'a Reading,
    mean_temperature: f64,
    mean_humidity: Option<f64>,
    count: u32,
}

/// Latest reading and means. Humidity means skip readings without humidity.
fn summarize(readings: &[Reading]) -> Option<Summary<'_>> {
    let last = readings.iter().max_by_key(|r| (r.timestamp, r.id))?;

    let count = readings.len();
    let mean_temperature = readings.iter().map(|r| r.temperature).sum::<f64>() / count as f64;

    let humidities: Vec<f64> = readings.iter().filter_map(|r| r.humidity).collect();
    let mean_humidity = if humidities.is_empty() {
        None
    } else {
        Some(humidities.iter().sum::<f64>() / humidities.len() as f64)
    };

    Some(Summary {
        last,
        mean_temperature,
        mean_humidity,
        count: u32::try_from(count).unwrap_or(u32::MAX),
    })
}

/// Summarize one sensor's readings taken within `window` of `now`.
///
/// Returns `None` and writes nothing when the window holds no readings.
pub fn aggregate_window(
    store: &Store,
    sensor_id: &str,
    window: &WindowSpec,
    now: OffsetDateTime,
) -> Result<Option<AggregateRecord>, AggregateError> {
    let now = truncate_to_second(now);
    let start = now.checked_sub(window.duration());

    let mut query = ReadingQuery::new().sensor(sensor_id);
    if let Some(start) = start {
        query = query.since(start);
    }
    let readings = store.query_readings(&query)?;

    let Some(summary) = summarize(&readings) else {
        debug!("No readings for {} in the last {}", sensor_id, window);
        return Ok(None);
    };

    let record = NewAggregate {
        sensor_id: sensor_id.to_string(),
        window_label: window.label().to_string(),
        window_start: start,
        window_end: now,
        last_reading_at: summary.last.timestamp,
        last_temperature: summary.last.temperature,
        last_humidity: summary.last.humidity,
        mean_temperature: summary.mean_temperature,
        mean_humidity: summary.mean_humidity,
        sample_count: summary.count,
        sentinel: false,
        computed_at: now,
    };
    let id = store.append_aggregate(&record)?;

    Ok(Some(AggregateRecord::from_new(id, &record)))
}

/// Summarize one sensor's readings since its checkpoint and advance it.
///
/// Readings strictly after the checkpoint (or from the beginning of history)
/// up to `now`, or up to the checkpoint itself if that is later, are covered.
/// Checkpoints fall on whole seconds while readings keep milliseconds, so the
/// recorded `window_start` (checkpoint + 1s) is a label for the first whole
/// second of the range, not its lower bound. Record and checkpoint are
/// committed together.
pub fn aggregate_from_checkpoint(
    store: &mut Store,
    sensor_id: &str,
    label: &str,
    now: OffsetDateTime,
) -> Result<AggregateOutcome, AggregateError> {
    let now = truncate_to_second(now);
    let checkpoint = store.get_checkpoint(sensor_id)?;
    let window_start = checkpoint.map(|c| c + Duration::SECOND);
    let window_end = checkpoint.map_or(now, |c| c.max(now));

    let mut query = ReadingQuery::new()
        .sensor(sensor_id)
        .until(window_end)
        .oldest_first();
    if let Some(checkpoint) = checkpoint {
        query = query.after(checkpoint);
    }
    let readings = store.query_readings(&query)?;

    let record = match summarize(&readings) {
        Some(summary) => NewAggregate {
            sensor_id: sensor_id.to_string(),
            window_label: label.to_string(),
            window_start,
            window_end,
            last_reading_at: summary.last.timestamp,
            last_temperature: summary.last.temperature,
            last_humidity: summary.last.humidity,
            mean_temperature: summary.mean_temperature,
            mean_humidity: summary.mean_humidity,
            sample_count: summary.count,
            sentinel: false,
            computed_at: now,
        },
        None => {
            let previous = store.query_readings(
                &ReadingQuery::new()
                    .sensor(sensor_id)
                    .until(window_end)
                    .limit(1),
            )?;
            let Some(previous) = previous.first() else {
                debug!("No readings stored for {}", sensor_id);
                return Ok(AggregateOutcome::NoData);
            };

            NewAggregate {
                sensor_id: sensor_id.to_string(),
                window_label: label.to_string(),
                window_start,
                window_end,
                last_reading_at: previous.timestamp,
                last_temperature: previous.temperature,
                last_humidity: previous.humidity,
                mean_temperature: previous.temperature,
                mean_humidity: previous.humidity,
                sample_count: 0,
                sentinel: true,
                computed_at: now,
            }
        }
    };

    let stored = store.commit_checkpoint_run(&record)?;
    debug!(
        "Aggregated {} reading(s) for {} up to {}",
        stored.sample_count, sensor_id, window_end
    );

    Ok(if stored.sentinel {
        AggregateOutcome::Sentinel(stored)
    } else {
        AggregateOutcome::Written(stored)
    })
}

/// One async lock per sensor, created on first use and dropped once no run
/// holds or waits on it.
#[derive(Default)]
pub struct SensorLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SensorLocks {
    /// Wait for exclusive use of `sensor_id`.
    pub async fn acquire(&self, sensor_id: &str) -> SensorLease<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(sensor_id.to_string()).or_default())
        };

        SensorLease {
            locks: self,
            sensor_id: sensor_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Sensors with a live lock.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive use of one sensor. Dropping it releases the lock and forgets
/// the sensor if nobody else is queued on it.
pub struct SensorLease<'a> {
    locks: &'a SensorLocks,
    sensor_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SensorLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self
            .locks
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Only the map's own reference left
        if locks
            .get(&self.sensor_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.sensor_id);
        }
    }
}

/// Per-sensor status in a bulk run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    Aggregated,
    Sentinel,
    NoData,
    Failed,
}

/// Result for one sensor of a bulk run.
#[derive(Debug, Clone, Serialize)]
pub struct BulkEntry {
    pub sensor_id: String,
    pub status: BulkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<AggregateRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a bulk checkpoint run across all sensors.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BulkReport {
    pub results: Vec<BulkEntry>,
}

impl BulkReport {
    pub fn count(&self, status: BulkStatus) -> usize {
        self.results.iter().filter(|e| e.status == status).count()
    }
}

/// Aggregation entry point for the service.
#[derive(Clone)]
pub struct Aggregator {
    state: Arc<AppState>,
}

impl Aggregator {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Fixed-window aggregation for one sensor.
    ///
    /// The window token is validated before anything is read.
    pub async fn aggregate(
        &self,
        sensor_id: &str,
        window: &str,
    ) -> Result<Option<AggregateRecord>, AggregateError> {
        let window = WindowSpec::parse(window)?;

        let record = {
            let store = self.state.store.lock().await;
            aggregate_window(&store, sensor_id, &window, OffsetDateTime::now_utc())?
        };

        if let Some(record) = &record {
            self.state.publish(&LiveEvent::aggregate(record.clone()));
        }
        Ok(record)
    }

    /// Checkpoint aggregation for one sensor.
    ///
    /// Concurrent runs for the same sensor are serialized; runs for
    /// different sensors only contend on the store.
    pub async fn aggregate_from_checkpoint(
        &self,
        sensor_id: &str,
        label: &str,
    ) -> Result<AggregateOutcome, AggregateError> {
        let _lease = self.state.aggregation_locks.acquire(sensor_id).await;

        let outcome = {
            let mut store = self.state.store.lock().await;
            aggregate_from_checkpoint(&mut store, sensor_id, label, OffsetDateTime::now_utc())?
        };

        if let Some(record) = outcome.record() {
            self.state.publish(&LiveEvent::aggregate(record.clone()));
        }
        Ok(outcome)
    }

    /// Checkpoint aggregation for every known sensor, one after another.
    ///
    /// Per-sensor failures are reported in the result rather than aborting
    /// the run. Only failing to list sensors is an error.
    pub async fn aggregate_all(&self, label: &str) -> Result<BulkReport, AggregateError> {
        let sensors = self.state.store.lock().await.known_sensors()?;
        let mut report = BulkReport::default();

        for sensor_id in sensors {
            let entry = match self.aggregate_from_checkpoint(&sensor_id, label).await {
                Ok(outcome) => BulkEntry {
                    status: outcome.status(),
                    record: outcome.record().cloned(),
                    error: None,
                    sensor_id,
                },
                Err(e) => {
                    warn!("Aggregation failed for {}: {}", sensor_id, e);
                    BulkEntry {
                        sensor_id,
                        status: BulkStatus::Failed,
                        record: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            report.results.push(entry);
        }

        info!(
            "Bulk aggregation '{}': {} aggregated, {} sentinel, {} without data, {} failed",
            label,
            report.count(BulkStatus::Aggregated),
            report.count(BulkStatus::Sentinel),
            report.count(BulkStatus::NoData),
            report.count(BulkStatus::Failed),
        );
        Ok(report)
    }
}
