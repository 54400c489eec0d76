//! WebSocket fan-out of fleet events to connected dashboards/tools.
//!
//! One broadcast channel per process; every connected client gets every
//! event as a JSON frame `{type, data, timestamp}`. A slow or disconnected
//! client only drops its own lagged messages, it never blocks a publisher.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::api::AppState;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    NetworkStatus,
    NodeRegistered,
    TaskSubmitted,
    TaskCompleted,
    TaskFailed,
}

impl EventType {
    fn as_str(&self) -> &'static str {
        match self {
            EventType::NetworkStatus => "network_status",
            EventType::NodeRegistered => "node_registered",
            EventType::TaskSubmitted => "task_submitted",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
        }
    }
}

#[derive(Debug, Serialize, Clone)]
struct WsFrame {
    #[serde(rename = "type")]
    event_type: &'static str,
    data: serde_json::Value,
    timestamp: chrono::DateTime<Utc>,
}

/// Broadcasts fleet events to any number of connected WebSocket clients.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<String>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event_type: EventType, data: serde_json::Value) {
        let frame = WsFrame {
            event_type: event_type.as_str(),
            data,
            timestamp: Utc::now(),
        };
        match serde_json::to_string(&frame) {
            Ok(json) => {
                // Err only means there are currently no subscribers; that's fine.
                let _ = self.sender.send(json);
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize websocket frame"),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.broadcaster.subscribe();

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Ok(json) => {
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "websocket client lagged, dropping missed frames");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => continue,
                }
            }
        }
    }
}
