//! Ingestion gateway, aggregation and HTTP API for wireless sensor readings.
//!
//! This crate provides a service that:
//! - Accepts batches of readings pushed by sensor gateways
//! - Drops gateway retransmissions within a short time-to-live
//! - Stores readings in the local database
//! - Computes per-sensor aggregates over fixed windows or since a checkpoint
//! - Pushes accepted readings and new aggregates to WebSocket viewers
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `POST /api/ingest` - Gateway batch (also `POST /data` on the ingest listener)
//! - `GET /api/readings` - Most recent readings across sensors
//! - `GET /api/sensors/summary` - Latest values and means per sensor
//! - `GET /api/sensors/names` - Display names
//! - `PUT /api/sensors/{id}/name` - Set a display name
//! - `GET /api/sensors/{id}/history` - Newest readings of one sensor
//! - `POST /api/sensors/{id}/aggregate?window=5m` - Fixed-window aggregate
//! - `POST /api/sensors/{id}/aggregate/checkpoint` - Aggregate since the last checkpoint
//! - `POST /api/aggregate/checkpoint` - Checkpoint aggregation for every sensor
//! - `GET /api/aggregates` - Aggregate records as JSON or CSV
//! - `GET /api/aggregates/{id}` - One aggregate record
//! - `WS /api/ws` - Live readings and aggregates
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/sensorhub/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:3000"
//!
//! [storage]
//! path = "~/.local/share/sensorhub/data.db"
//!
//! [ingest]
//! bind = "0.0.0.0:8080"
//! dedup_ttl_secs = 30
//! accepted_types = ["MST01"]
//!
//! [aggregation]
//! interval_secs = 900
//! label = "checkpoint"
//! ```

pub mod aggregator;
pub mod api;
pub mod broadcast;
pub mod config;
pub mod dedup;
pub mod ingest;
pub mod scheduler;
pub mod state;
pub mod ws;

pub use aggregator::{AggregateError, AggregateOutcome, Aggregator, BulkReport, BulkStatus};
pub use broadcast::{Broadcaster, QueuedViewer, ViewerChannel};
pub use config::{
    AggregationConfig, Config, ConfigError, IngestConfig, ServerConfig, StorageConfig,
};
pub use dedup::DedupGuard;
pub use ingest::{IngestGateway, IngestReport};
pub use scheduler::Scheduler;
pub use state::{AppState, LiveEvent};
