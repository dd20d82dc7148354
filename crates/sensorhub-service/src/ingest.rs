//! Gateway batch ingestion.
//!
//! Each item of a batch goes through decode, duplicate check, storage and
//! live publish, in that order. Items are independent: a bad or duplicate
//! item is counted and skipped without affecting the rest of the batch.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use sensorhub_store::Reading;
use sensorhub_types::RawItem;

use crate::state::{AppState, LiveEvent};

/// Accepted/skipped counts for one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub skipped: usize,
}

/// Why an item was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Invalid,
    Duplicate,
    StorageFault,
}

/// Entry point for gateway-pushed batches.
#[derive(Clone)]
pub struct IngestGateway {
    state: Arc<AppState>,
}

impl IngestGateway {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Ingest a batch of raw JSON items.
    pub async fn ingest_batch(&self, items: &[serde_json::Value]) -> IngestReport {
        let received_at = OffsetDateTime::now_utc();
        let mut report = IngestReport::default();

        for item in items {
            match self.ingest_item(item, received_at).await {
                Ok(_) => report.accepted += 1,
                Err(_) => report.skipped += 1,
            }
        }

        debug!(
            "Ingested batch of {}: {} accepted, {} skipped",
            items.len(),
            report.accepted,
            report.skipped
        );
        report
    }

    async fn ingest_item(
        &self,
        item: &serde_json::Value,
        received_at: OffsetDateTime,
    ) -> Result<Reading, Skip> {
        let raw: RawItem = serde_json::from_value(item.clone()).map_err(|e| {
            debug!("Skipping undecodable item: {}", e);
            Skip::Invalid
        })?;

        let reading = raw
            .into_reading(&self.state.config.ingest.accepted_types, received_at)
            .map_err(|e| {
                debug!("Skipping item: {}", e);
                Skip::Invalid
            })?;

        if self.state.dedup.seen(&reading.sensor_id, reading.timestamp) {
            debug!(
                "Duplicate reading from {} at {}",
                reading.sensor_id, reading.timestamp
            );
            return Err(Skip::Duplicate);
        }

        let id = {
            let store = self.state.store.lock().await;
            store.append_reading(&reading).map_err(|e| {
                warn!("Failed to store reading from {}: {}", reading.sensor_id, e);
                Skip::StorageFault
            })?
        };

        let stored = Reading::from_sensor_reading(id, &reading);
        self.state.publish(&LiveEvent::reading(stored.clone()));
        Ok(stored)
    }
}
