use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{Duration, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::db;
use crate::hub::{ConnId, Outbound};
use crate::metrics::WS_CONNECTIONS;
use crate::rest::AppState;

const DEFAULT_HISTORY_HOURS: i64 = 1;
const MAX_HISTORY_LIMIT: i64 = 500;

/// Inbound observer commands.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Command {
    Subscribe {
        device_id: String,
    },
    Unsubscribe {
        device_id: String,
    },
    History {
        device_id: String,
        hours: Option<i64>,
        limit: Option<i64>,
    },
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// One task pair per observer: a writer forwarding hub events to the
/// socket, and this reader loop dispatching commands. Errors on either
/// side only tear down this connection.
async fn handle_connection(socket: WebSocket, state: AppState) {
    let snapshot = match db::list_devices(&state.pool).await {
        Ok(devices) => devices,
        Err(e) => {
            warn!("device snapshot unavailable: {e}");
            Vec::new()
        }
    };

    let (conn_id, mut events) = state.hub.register(snapshot).await;
    WS_CONNECTIONS.inc();
    info!(%conn_id, "observer connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("event serialization failed: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => handle_command(&state, conn_id, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.disconnect(conn_id).await;
    writer.abort();
    WS_CONNECTIONS.dec();
    info!(%conn_id, "observer disconnected");
}

async fn handle_command(state: &AppState, conn_id: ConnId, text: &str) {
    let command = match serde_json::from_str::<Command>(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(%conn_id, "ignoring unrecognized command: {e}");
            return;
        }
    };

    match command {
        Command::Subscribe { device_id } => {
            state.hub.subscribe(conn_id, &device_id).await;
            debug!(%conn_id, %device_id, "subscribed");
        }
        Command::Unsubscribe { device_id } => {
            state.hub.unsubscribe(conn_id, &device_id).await;
            debug!(%conn_id, %device_id, "unsubscribed");
        }
        Command::History {
            device_id,
            hours,
            limit,
        } => {
            // The hub holds no history; on-demand pulls go to storage.
            let since = Utc::now() - Duration::hours(hours.unwrap_or(DEFAULT_HISTORY_HOURS));
            let limit = limit.unwrap_or(MAX_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
            match db::query_telemetry(&state.pool, &device_id, since, limit).await {
                Ok(records) => {
                    state
                        .hub
                        .send_to(conn_id, Outbound::History { device_id, records })
                        .await;
                }
                Err(e) => warn!(%device_id, "history query failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_command() {
        let command: Command =
            serde_json::from_str(r#"{"action":"subscribe","device_id":"VIRTUAL_000"}"#).unwrap();
        assert!(matches!(
            command,
            Command::Subscribe { device_id } if device_id == "VIRTUAL_000"
        ));
    }

    #[test]
    fn parses_history_command_with_defaults() {
        let command: Command =
            serde_json::from_str(r#"{"action":"history","device_id":"VIRTUAL_000"}"#).unwrap();
        assert!(matches!(
            command,
            Command::History { hours: None, limit: None, .. }
        ));
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(serde_json::from_str::<Command>(r#"{"action":"shout","device_id":"x"}"#).is_err());
    }
}
