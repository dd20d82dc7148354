//! REST API endpoints.
//!
//! # Lock Acquisition
//!
//! Handlers take `state.store` only for the duration of one store call and
//! validate their input before locking. Checkpoint aggregation additionally
//! takes the sensor's aggregation lock, always before the store lock.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Store errors
//! map to HTTP 500; malformed input maps to HTTP 400.
//!
//! # Example
//!
//! ```ignore
//! use sensorhub_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use sensorhub_store::{
    AggregateQuery, AggregateRecord, NamedReading, Reading, SensorName, SensorSummary,
};
use sensorhub_types::normalize_sensor_id;

use crate::aggregator::{AggregateError, Aggregator, BulkReport, BulkStatus};
use crate::ingest::{IngestGateway, IngestReport};
use crate::state::AppState;

/// Default number of rows for `/api/readings`.
pub const DEFAULT_RECENT_LIMIT: u32 = 50;
/// Default number of rows for `/api/sensors/{id}/history`.
pub const DEFAULT_HISTORY_LIMIT: u32 = 300;
/// Upper bound for any `limit` parameter.
pub const MAX_LIMIT: u32 = 10_000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        // Ingestion
        .route("/api/ingest", post(ingest))
        // Dashboard queries
        .route("/api/readings", get(get_recent_readings))
        .route("/api/sensors/summary", get(get_summary))
        .route("/api/sensors/names", get(get_names))
        .route("/api/sensors/{id}/name", put(set_name))
        .route("/api/sensors/{id}/history", get(get_history))
        // Aggregation
        .route("/api/sensors/{id}/aggregate", post(aggregate_window))
        .route(
            "/api/sensors/{id}/aggregate/checkpoint",
            post(aggregate_checkpoint),
        )
        .route("/api/aggregate/checkpoint", post(aggregate_all))
        .route("/api/aggregates", get(get_aggregates))
        .route("/api/aggregates/{id}", get(get_aggregate))
}

/// Router for the gateway-facing listener.
pub fn ingest_router() -> Router<Arc<AppState>> {
    Router::new().route("/data", post(ingest))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Connected live viewers.
    pub viewers: usize,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        started_at: state.started_at,
        viewers: state.broadcaster.viewer_count(),
    })
}

/// Accept a gateway batch.
///
/// The body must be a JSON array; individual items that fail validation are
/// skipped and counted rather than failing the request.
async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<IngestReport>, AppError> {
    let serde_json::Value::Array(items) = body else {
        return Err(AppError::BadRequest(
            "Request body must be a JSON array of items".to_string(),
        ));
    };

    let report = IngestGateway::new(state).ingest_batch(&items).await;
    Ok(Json(report))
}

/// `limit` query parameter.
#[derive(Debug, Deserialize, Default)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

impl LimitQuery {
    /// The requested limit, or `default`. Rejects 0 and values above [`MAX_LIMIT`].
    pub fn resolve(&self, default: u32) -> Result<u32, AppError> {
        match self.limit {
            None => Ok(default),
            Some(limit) if (1..=MAX_LIMIT).contains(&limit) => Ok(limit),
            Some(limit) => Err(AppError::BadRequest(format!(
                "Invalid limit {}: must be between 1 and {}",
                limit, MAX_LIMIT
            ))),
        }
    }
}

/// Most recent readings across all sensors.
async fn get_recent_readings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<NamedReading>>, AppError> {
    let limit = params.resolve(DEFAULT_RECENT_LIMIT)?;
    let readings = state.store.lock().await.recent_readings(limit)?;
    Ok(Json(readings))
}

/// Latest reading and all-time means per sensor.
async fn get_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SensorSummary>>, AppError> {
    let summary = state.store.lock().await.summary_per_sensor()?;
    Ok(Json(summary))
}

async fn get_names(State(state): State<Arc<AppState>>) -> Result<Json<Vec<SensorName>>, AppError> {
    let names = state.store.lock().await.sensor_names()?;
    Ok(Json(names))
}

/// Request body for naming a sensor.
#[derive(Debug, Deserialize)]
pub struct SetNameRequest {
    #[serde(alias = "name")]
    pub display_name: String,
}

async fn set_name(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<SetNameRequest>,
) -> Result<Json<SensorName>, AppError> {
    let sensor_id = normalize_sensor_id(&id);
    let display_name = request.display_name.trim();
    if sensor_id.is_empty() {
        return Err(AppError::BadRequest("Sensor id cannot be empty".to_string()));
    }
    if display_name.is_empty() {
        return Err(AppError::BadRequest("Display name cannot be empty".to_string()));
    }

    state
        .store
        .lock()
        .await
        .set_sensor_name(&sensor_id, display_name)?;

    Ok(Json(SensorName {
        sensor_id,
        display_name: Some(display_name.to_string()),
    }))
}

/// Newest readings of one sensor.
async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let limit = params.resolve(DEFAULT_HISTORY_LIMIT)?;
    let sensor_id = normalize_sensor_id(&id);
    let history = state.store.lock().await.history_for(&sensor_id, limit)?;
    Ok(Json(history))
}

/// `window` query parameter.
#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub window: Option<String>,
}

/// Result of a fixed-window run. `record` is null when the window was empty.
#[derive(Debug, Serialize)]
pub struct WindowResponse {
    pub record: Option<AggregateRecord>,
}

async fn aggregate_window(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<WindowResponse>, AppError> {
    let window = params
        .window
        .ok_or_else(|| AppError::BadRequest("Missing 'window' parameter (e.g. 5m, 1h)".to_string()))?;
    let sensor_id = normalize_sensor_id(&id);

    let record = Aggregator::new(state).aggregate(&sensor_id, &window).await?;
    Ok(Json(WindowResponse { record }))
}

/// `label` query parameter for checkpoint runs.
#[derive(Debug, Deserialize, Default)]
pub struct LabelQuery {
    pub label: Option<String>,
}

impl LabelQuery {
    fn resolve(&self, state: &AppState) -> Result<String, AppError> {
        match self.label.as_deref().map(str::trim) {
            None => Ok(state.config.aggregation.label.clone()),
            Some("") => Err(AppError::BadRequest("Label cannot be empty".to_string())),
            Some(label) => Ok(label.to_string()),
        }
    }
}

/// Result of a checkpoint run for one sensor.
#[derive(Debug, Serialize)]
pub struct CheckpointResponse {
    pub status: BulkStatus,
    pub record: Option<AggregateRecord>,
}

async fn aggregate_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<LabelQuery>,
) -> Result<Json<CheckpointResponse>, AppError> {
    let label = params.resolve(&state)?;
    let sensor_id = normalize_sensor_id(&id);

    let outcome = Aggregator::new(state)
        .aggregate_from_checkpoint(&sensor_id, &label)
        .await?;

    Ok(Json(CheckpointResponse {
        status: outcome.status(),
        record: outcome.record().cloned(),
    }))
}

async fn aggregate_all(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LabelQuery>,
) -> Result<Json<BulkReport>, AppError> {
    let label = params.resolve(&state)?;
    let report = Aggregator::new(state).aggregate_all(&label).await?;
    Ok(Json(report))
}

/// Query parameters for aggregate export.
#[derive(Debug, Deserialize, Default)]
pub struct AggregatesQuery {
    /// RFC 3339 instant or Unix seconds.
    pub since: Option<String>,
    /// RFC 3339 instant or Unix seconds.
    pub until: Option<String>,
    pub window: Option<String>,
    pub sensor: Option<String>,
    /// `json` (default) or `csv`.
    pub format: Option<String>,
}

/// Export format for aggregate records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl AggregatesQuery {
    /// Validate the parameters and build the store query.
    pub fn to_query(&self) -> Result<(AggregateQuery, ExportFormat), AppError> {
        let format = match self.format.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("json") => ExportFormat::Json,
            Some("csv") => ExportFormat::Csv,
            Some(other) => {
                return Err(AppError::BadRequest(format!(
                    "Unsupported format '{}': expected json or csv",
                    other
                )));
            }
        };

        let since = self
            .since
            .as_deref()
            .map(|v| parse_instant("since", v))
            .transpose()?;
        let until = self
            .until
            .as_deref()
            .map(|v| parse_instant("until", v))
            .transpose()?;

        if let (Some(since), Some(until)) = (since, until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
                since, until
            )));
        }

        let mut query = AggregateQuery::new();
        if let Some(since) = since {
            query = query.since(since);
        }
        if let Some(until) = until {
            query = query.until(until);
        }
        if let Some(window) = self.window.as_deref() {
            query = query.window(window);
        }
        if let Some(sensor) = self.sensor.as_deref() {
            query = query.sensor(&normalize_sensor_id(sensor));
        }

        Ok((query, format))
    }
}

fn parse_instant(field: &str, value: &str) -> Result<OffsetDateTime, AppError> {
    let invalid = || {
        AppError::BadRequest(format!(
            "Invalid '{}' value '{}': expected RFC 3339 or Unix seconds",
            field, value
        ))
    };

    if let Ok(secs) = value.parse::<i64>() {
        return OffsetDateTime::from_unix_timestamp(secs).map_err(|_| invalid());
    }
    OffsetDateTime::parse(value, &Rfc3339).map_err(|_| invalid())
}

/// Export aggregate records as JSON or CSV.
async fn get_aggregates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AggregatesQuery>,
) -> Result<Response, AppError> {
    let (query, format) = params.to_query()?;

    let response = match format {
        ExportFormat::Json => {
            let records = state.store.lock().await.query_aggregates(&query)?;
            Json(records).into_response()
        }
        ExportFormat::Csv => {
            let csv = state.store.lock().await.export_aggregates_csv(&query)?;
            (
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                    (
                        header::CONTENT_DISPOSITION,
                        "attachment; filename=\"aggregates.csv\"",
                    ),
                ],
                csv,
            )
                .into_response()
        }
    };

    Ok(response)
}

async fn get_aggregate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<AggregateRecord>, AppError> {
    let record = state.store.lock().await.get_aggregate(id)?;
    record
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Aggregate record {} not found", id)))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(sensorhub_store::Error),
}

impl From<sensorhub_store::Error> for AppError {
    fn from(e: sensorhub_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl From<AggregateError> for AppError {
    fn from(e: AggregateError) -> Self {
        match e {
            AggregateError::InvalidWindowSpec(e) => AppError::BadRequest(e.to_string()),
            AggregateError::Storage(e) => AppError::Store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use sensorhub_store::Store;
    use sensorhub_types::SensorReading;
    use time::Duration;
    use tower::ServiceExt;

    use crate::config::Config;

    fn create_test_state() -> Arc<AppState> {
        let store = Store::open_in_memory().unwrap();
        AppState::new(store, Config::default())
    }

    /// State with sensor "aa:01" holding readings 20.0 and 22.0 from the
    /// last few minutes.
    async fn state_with_readings() -> Arc<AppState> {
        let state = create_test_state();
        let now = OffsetDateTime::now_utc();
        {
            let store = state.store.lock().await;
            for (secs_ago, temperature) in [(120, 20.0), (60, 22.0)] {
                store
                    .append_reading(&SensorReading::new(
                        "aa:01",
                        now - Duration::seconds(secs_ago),
                        temperature,
                        Some(50.0),
                    ))
                    .unwrap();
            }
        }
        state
    }

    async fn response_body(response: Response) -> String {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn response_json(response: Response) -> serde_json::Value {
        serde_json::from_str(&response_body(response).await).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router().with_state(create_test_state());

        let response = app.oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
        assert_eq!(json["viewers"], 0);
    }

    #[tokio::test]
    async fn test_ingest_endpoint() {
        let state = create_test_state();
        let app = router().with_state(Arc::clone(&state));

        let body = serde_json::json!([
            {"type": "MST01", "mac": "AA:01", "timestamp": "2024-05-01T12:00:00Z",
             "temperature": 20.0, "humidity": 40.0},
            {"type": "MST01", "mac": "AA:01", "timestamp": "2024-05-01T12:00:00Z",
             "temperature": 20.0, "humidity": 40.0},
            {"type": "MST01", "mac": "AA:02", "humidity": 40.0}
        ]);
        let response = app
            .oneshot(json_request("POST", "/api/ingest", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["accepted"], 1);
        assert_eq!(json["skipped"], 2);
        assert_eq!(state.store.lock().await.count_readings(None).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_rejects_non_array() {
        let app = router().with_state(create_test_state());

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/ingest",
                serde_json::json!({"type": "MST01"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("JSON array"));
    }

    #[tokio::test]
    async fn test_ingest_invalid_json_body() {
        let app = router().with_state(create_test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/ingest")
                    .header("content-type", "application/json")
                    .body(Body::from("[{ invalid json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_gateway_router_serves_data_only() {
        let app = ingest_router().with_state(create_test_state());

        let response = app
            .clone()
            .oneshot(json_request("POST", "/data", serde_json::json!([])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_recent_readings_default_and_limit() {
        let state = state_with_readings().await;
        let app = router().with_state(state);

        let response = app.clone().oneshot(get("/api/readings")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["temperature"], 22.0);
        assert!(json[0]["display_name"].is_null());

        let response = app.clone().oneshot(get("/api/readings?limit=1")).await.unwrap();
        let json = response_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);

        let response = app.oneshot(get("/api/readings?limit=0")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_summary_and_names() {
        let state = state_with_readings().await;
        let app = router().with_state(state);

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/sensors/AA:01/name",
                serde_json::json!({"display_name": "  Greenhouse  "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["sensor_id"], "aa:01");
        assert_eq!(json["display_name"], "Greenhouse");

        let response = app.clone().oneshot(get("/api/sensors/names")).await.unwrap();
        let json = response_json(response).await;
        assert_eq!(json[0]["display_name"], "Greenhouse");

        let response = app.oneshot(get("/api/sensors/summary")).await.unwrap();
        let json = response_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["display_name"], "Greenhouse");
        assert_eq!(json[0]["latest"]["temperature"], 22.0);
        assert_eq!(json[0]["mean"]["temperature"], 21.0);
        assert_eq!(json[0]["mean"]["humidity"], 50.0);
    }

    #[tokio::test]
    async fn test_set_name_rejects_empty() {
        let app = router().with_state(create_test_state());

        let response = app
            .oneshot(json_request(
                "PUT",
                "/api/sensors/aa:01/name",
                serde_json::json!({"name": "   "}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_history_endpoint() {
        let state = state_with_readings().await;
        let app = router().with_state(state);

        let response = app
            .clone()
            .oneshot(get("/api/sensors/aa:01/history?limit=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["temperature"], 22.0);

        let response = app.oneshot(get("/api/sensors/unknown/history")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_fixed_window_aggregation() {
        let state = state_with_readings().await;
        let app = router().with_state(state);

        let response = app
            .clone()
            .oneshot(post("/api/sensors/aa:01/aggregate?window=5m"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["record"]["window_label"], "5m");
        assert_eq!(json["record"]["mean_temperature"], 21.0);
        assert_eq!(json["record"]["sample_count"], 2);

        let response = app
            .clone()
            .oneshot(post("/api/sensors/other/aggregate?window=5m"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response_json(response).await["record"].is_null());

        let response = app
            .clone()
            .oneshot(post("/api/sensors/aa:01/aggregate?window=5d"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post("/api/sensors/aa:01/aggregate"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_checkpoint_aggregation() {
        let state = state_with_readings().await;
        let app = router().with_state(state);

        let response = app
            .clone()
            .oneshot(post("/api/sensors/aa:01/aggregate/checkpoint"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "aggregated");
        assert_eq!(json["record"]["window_label"], "checkpoint");
        assert_eq!(json["record"]["sample_count"], 2);

        let response = app
            .clone()
            .oneshot(post("/api/sensors/aa:01/aggregate/checkpoint?label=nightly"))
            .await
            .unwrap();
        let json = response_json(response).await;
        assert_eq!(json["status"], "sentinel");
        assert_eq!(json["record"]["window_label"], "nightly");

        let response = app
            .clone()
            .oneshot(post("/api/sensors/nobody/aggregate/checkpoint"))
            .await
            .unwrap();
        let json = response_json(response).await;
        assert_eq!(json["status"], "no_data");
        assert!(json["record"].is_null());

        let response = app
            .oneshot(post("/api/sensors/aa:01/aggregate/checkpoint?label="))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bulk_aggregation() {
        let state = state_with_readings().await;
        let app = router().with_state(state);

        let response = app.oneshot(post("/api/aggregate/checkpoint")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        let results = json["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["sensor_id"], "aa:01");
        assert_eq!(results[0]["status"], "aggregated");
    }

    #[tokio::test]
    async fn test_aggregate_export_json_and_csv() {
        let state = state_with_readings().await;
        let app = router().with_state(state);

        app.clone()
            .oneshot(post("/api/sensors/aa:01/aggregate?window=5m"))
            .await
            .unwrap();
        app.clone()
            .oneshot(post("/api/sensors/aa:01/aggregate/checkpoint"))
            .await
            .unwrap();

        let response = app.clone().oneshot(get("/api/aggregates")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await.as_array().unwrap().len(), 2);

        let response = app
            .clone()
            .oneshot(get("/api/aggregates?window=checkpoint&sensor=AA:01"))
            .await
            .unwrap();
        let json = response_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["window_label"], "checkpoint");

        let response = app
            .clone()
            .oneshot(get("/api/aggregates?format=csv&window=5m"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/csv")
        );
        let body = response_body(response).await;
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("id,sensor_id,window_label"));

        let response = app
            .oneshot(get("/api/aggregates?since=2000-01-01T00:00:00Z&until=946684800"))
            .await
            .unwrap();
        assert_eq!(response_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_get_aggregate_by_id() {
        let state = state_with_readings().await;
        let app = router().with_state(state);

        let response = app
            .clone()
            .oneshot(post("/api/sensors/aa:01/aggregate?window=1h"))
            .await
            .unwrap();
        let id = response_json(response).await["record"]["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(get(&format!("/api/aggregates/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["window_label"], "1h");

        let response = app.oneshot(get("/api/aggregates/9999")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(
            response_json(response).await["error"]
                .as_str()
                .unwrap()
                .contains("9999")
        );
    }

    #[tokio::test]
    async fn test_aggregate_export_rejects_bad_params() {
        let app = router().with_state(create_test_state());

        for uri in [
            "/api/aggregates?format=xml",
            "/api/aggregates?since=yesterday",
            "/api/aggregates?since=2024-02-01T00:00:00Z&until=2024-01-01T00:00:00Z",
        ] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[test]
    fn test_limit_query_resolve() {
        assert_eq!(LimitQuery::default().resolve(50).unwrap(), 50);
        assert_eq!(LimitQuery { limit: Some(7) }.resolve(50).unwrap(), 7);
        assert!(LimitQuery { limit: Some(0) }.resolve(50).is_err());
        assert!(
            LimitQuery {
                limit: Some(MAX_LIMIT + 1)
            }
            .resolve(50)
            .is_err()
        );
    }

    #[test]
    fn test_parse_instant() {
        assert_eq!(
            parse_instant("since", "1714564800").unwrap(),
            time::macros::datetime!(2024-05-01 12:00 UTC)
        );
        assert_eq!(
            parse_instant("since", "2024-05-01T14:00:00+02:00").unwrap(),
            time::macros::datetime!(2024-05-01 12:00 UTC)
        );
        assert!(parse_instant("since", "05/01/2024").is_err());
    }

    #[test]
    fn test_app_error_from_aggregate_error() {
        let err: AppError = AggregateError::InvalidWindowSpec(
            sensorhub_types::ParseError::InvalidWindowSpec("5d".to_string()),
        )
        .into();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("5d")));
    }

    #[tokio::test]
    async fn test_error_response_format() {
        let response = AppError::BadRequest("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_json(response).await, serde_json::json!({"error": "nope"}));
    }
}
