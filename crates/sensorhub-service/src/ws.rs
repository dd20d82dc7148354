//! WebSocket handler for live updates.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use sensorhub_store::Store;

use crate::broadcast::QueuedViewer;
use crate::state::{AppState, LiveEvent};

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The latest reading of every known sensor, serialized as reading events.
pub fn snapshot_events(store: &Store) -> sensorhub_store::Result<Vec<String>> {
    let mut events = Vec::new();
    for sensor_id in store.known_sensors()? {
        if let Some(reading) = store.latest_reading(&sensor_id)? {
            match serde_json::to_string(&LiveEvent::reading(reading)) {
                Ok(json) => events.push(json),
                Err(e) => warn!("Failed to serialize snapshot for {}: {}", sensor_id, e),
            }
        }
    }
    Ok(events)
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Register before taking the snapshot so nothing published in between is lost
    let (viewer, mut rx) = QueuedViewer::channel(state.config.server.viewer_buffer);
    let registration = state.broadcaster.register_guarded(Arc::new(viewer));

    info!("Live viewer {} connected", registration.id());

    let snapshot = {
        let store = state.store.lock().await;
        snapshot_events(&store)
    };

    match snapshot {
        Ok(events) => {
            for json in events {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    info!(
                        "Live viewer {} disconnected during initial snapshot",
                        registration.id()
                    );
                    return;
                }
            }
            debug!("Sent initial snapshot to live viewer {}", registration.id());
        }
        Err(e) => warn!("Failed to build initial snapshot: {}", e),
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sender
                .send(Message::Text(payload.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Inbound frames are only read to notice the client going away
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    info!("Live viewer {} disconnected", registration.id());
}
