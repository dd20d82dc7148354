//! Application state shared across handlers and background tasks.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::warn;

use sensorhub_store::{AggregateRecord, Reading, Store};

use crate::aggregator::SensorLocks;
use crate::broadcast::{Broadcaster, PublishReport};
use crate::config::Config;
use crate::dedup::DedupGuard;

/// Shared application state.
pub struct AppState {
    /// The data store. A single connection, so writes are serialized here.
    pub store: Mutex<Store>,
    /// Configuration loaded at startup.
    pub config: Config,
    /// Duplicate suppression for gateway retransmissions.
    pub dedup: Arc<DedupGuard>,
    /// Live viewer registry.
    pub broadcaster: Arc<Broadcaster>,
    /// Per-sensor aggregation locks.
    pub aggregation_locks: SensorLocks,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        let dedup = DedupGuard::new(config.ingest.dedup_ttl());
        Arc::new(Self {
            store: Mutex::new(store),
            config,
            dedup: Arc::new(dedup),
            broadcaster: Arc::new(Broadcaster::new()),
            aggregation_locks: SensorLocks::default(),
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Publish a live event to every viewer.
    pub fn publish(&self, event: &LiveEvent) -> PublishReport {
        match self.broadcaster.publish(event) {
            Ok(report) => report,
            Err(e) => {
                warn!("Failed to serialize live event: {}", e);
                PublishReport::default()
            }
        }
    }
}

/// An event pushed to live viewers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// A reading was accepted and stored.
    Reading { sensor_id: String, reading: Reading },
    /// An aggregate record was written.
    Aggregate { record: AggregateRecord },
}

impl LiveEvent {
    pub fn reading(reading: Reading) -> Self {
        Self::Reading {
            sensor_id: reading.sensor_id.clone(),
            reading,
        }
    }

    pub fn aggregate(record: AggregateRecord) -> Self {
        Self::Aggregate { record }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::QueuedViewer;
    use time::macros::datetime;

    fn test_reading(sensor_id: &str) -> Reading {
        Reading {
            id: 1,
            sensor_id: sensor_id.to_string(),
            timestamp: datetime!(2024-05-01 12:00 UTC),
            temperature: 21.5,
            humidity: Some(40.0),
            raw_hex: None,
        }
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let mut config = Config::default();
        config.ingest.dedup_ttl_secs = 90;
        let state = AppState::new(Store::open_in_memory().unwrap(), config);

        assert_eq!(state.dedup.ttl(), std::time::Duration::from_secs(90));
        assert_eq!(state.broadcaster.viewer_count(), 0);
        assert!(state.dedup.is_empty());
    }

    #[test]
    fn test_reading_event_json_shape() {
        let event = LiveEvent::reading(test_reading("aa:01"));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "reading");
        assert_eq!(json["sensor_id"], "aa:01");
        assert_eq!(json["reading"]["temperature"], 21.5);
        assert_eq!(json["reading"]["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_aggregate_event_json_shape() {
        let record = AggregateRecord {
            id: 9,
            sensor_id: "aa:01".to_string(),
            window_label: "5m".to_string(),
            window_start: Some(datetime!(2024-05-01 11:55 UTC)),
            window_end: datetime!(2024-05-01 12:00 UTC),
            last_reading_at: datetime!(2024-05-01 11:59 UTC),
            last_temperature: 21.0,
            last_humidity: None,
            mean_temperature: 20.5,
            mean_humidity: None,
            sample_count: 2,
            sentinel: false,
            computed_at: datetime!(2024-05-01 12:00 UTC),
        };
        let json = serde_json::to_value(LiveEvent::aggregate(record)).unwrap();

        assert_eq!(json["type"], "aggregate");
        assert_eq!(json["record"]["id"], 9);
        assert_eq!(json["record"]["window_label"], "5m");
    }

    #[tokio::test]
    async fn test_publish_reaches_registered_viewer() {
        let state = AppState::new(Store::open_in_memory().unwrap(), Config::default());
        let (viewer, mut rx) = QueuedViewer::channel(8);
        let _registration = state.broadcaster.register_guarded(Arc::new(viewer));

        let report = state.publish(&LiveEvent::reading(test_reading("aa:01")));
        assert_eq!(report.delivered, 1);

        let payload = rx.recv().await.unwrap();
        assert!(payload.contains(r#""type":"reading""#));
    }
}
