//! HTTP and WebSocket surface of the hub.
//!
//! - `GET /ws` - signalling socket; the client sends `join` itself
//! - `GET /ws/:room_id` - signalling socket joined to `room_id` on connect
//! - `GET /ping` - health check
//! - static files from the configured directory

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::signal::{ClientMessage, RoomId, ServerMessage};

pub fn build_router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/:room_id", get(ws_room_handler))
        .route("/ping", get(ping))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, None))
}

async fn ws_room_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Some(room_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, room: Option<RoomId>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // the hub holds the only sender, so disconnecting there ends the writer
    let client_id = {
        let mut hub = state.hub.write().await;
        let client_id = hub.connect(tx);
        if let Some(room) = room {
            if let Err(e) = hub.join(&client_id, &room) {
                hub.send(
                    &client_id,
                    ServerMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
        client_id
    };

    // Drain the client's queue into the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let hub = state.hub.clone();
    let reader_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let mut guard = hub.write().await;
            let result =
                ClientMessage::from_json(&text).and_then(|frame| guard.handle(&reader_id, frame));
            if let Err(e) = result {
                debug!("Frame from client {} rejected: {}", reader_id, e);
                guard.send(
                    &reader_id,
                    ServerMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.write().await.disconnect(&client_id);
    info!("Socket for client {} closed", client_id);
}
