//! Periodic bulk aggregation.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::{Aggregator, BulkStatus};
use crate::state::AppState;

/// Background task running checkpoint aggregation over all sensors on a
/// fixed interval.
pub struct Scheduler {
    state: Arc<AppState>,
}

impl Scheduler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start the schedule if one is configured.
    ///
    /// Returns `None` when `aggregation.interval_secs` is unset. The task
    /// stops when `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let Some(every) = self.state.config.aggregation.interval() else {
            info!("Scheduled aggregation disabled");
            return None;
        };
        let label = self.state.config.aggregation.label.clone();

        info!(
            "Starting scheduled aggregation every {}s (label: {})",
            every.as_secs(),
            label
        );

        let aggregator = Aggregator::new(Arc::clone(&self.state));
        Some(tokio::spawn(run(aggregator, label, every, cancel)))
    }
}

async fn run(aggregator: Aggregator, label: String, every: Duration, cancel: CancellationToken) {
    let mut timer = interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; wait a full period before the first run
    timer.tick().await;

    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {}
        }

        match aggregator.aggregate_all(&label).await {
            Ok(report) => {
                consecutive_failures = 0;
                let failed = report.count(BulkStatus::Failed);
                if failed > 0 {
                    warn!("Scheduled aggregation: {} sensor(s) failed", failed);
                } else {
                    debug!(
                        "Scheduled aggregation covered {} sensor(s)",
                        report.results.len()
                    );
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures <= 3 {
                    error!(
                        "Scheduled aggregation failed: {} (attempt {})",
                        e, consecutive_failures
                    );
                } else if consecutive_failures == 4 {
                    error!(
                        "Scheduled aggregation failed {} times in a row, further failures are logged at debug level",
                        consecutive_failures
                    );
                } else {
                    debug!("Scheduled aggregation failed: {}", e);
                }
            }
        }
    }

    info!("Scheduled aggregation stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use sensorhub_store::{AggregateQuery, Store};
    use sensorhub_types::SensorReading;
    use time::OffsetDateTime;

    #[tokio::test]
    async fn test_disabled_without_interval() {
        let state = AppState::new(Store::open_in_memory().unwrap(), Config::default());
        assert!(Scheduler::new(state).start(CancellationToken::new()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_interval_until_cancelled() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_reading(&SensorReading::new(
                "s1",
                OffsetDateTime::now_utc() - time::Duration::minutes(5),
                20.0,
                None,
            ))
            .unwrap();

        let mut config = Config::default();
        config.aggregation.interval_secs = Some(60);
        config.aggregation.label = "scheduled".to_string();
        let state = AppState::new(store, config);

        let cancel = CancellationToken::new();
        let handle = Scheduler::new(Arc::clone(&state))
            .start(cancel.clone())
            .unwrap();

        // Nothing before the first full period
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(
            state
                .store
                .lock()
                .await
                .query_aggregates(&AggregateQuery::new())
                .unwrap()
                .is_empty()
        );

        tokio::time::sleep(Duration::from_secs(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        let records = state
            .store
            .lock()
            .await
            .query_aggregates(&AggregateQuery::new().window("scheduled"))
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records[0].sentinel);
        assert!(records[1].sentinel);
    }
}
