use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use flowpilot_state_center::{EventEnvelope, Subscription};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::server::AppState;

pub(super) fn router() -> Router<AppState> {
    Router::new().route("/ws", get(websocket_handler))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    /// Restrict the feed to one execution
    execution_id: Option<String>,
}

#[derive(Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
}

async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let events = match query.execution_id.as_deref() {
        Some(id) => state.states().subscribe_execution(id),
        None => state.states().subscribe_all(),
    };
    ws.on_upgrade(move |socket| async move {
        handle_socket(socket, events).await;
    })
}

/// Forwards every execution event to the client until either side goes away.
async fn handle_socket(mut socket: WebSocket, mut events: Subscription<EventEnvelope>) {
    let welcome = json!({
        "type": "connected",
        "sessionId": Uuid::new_v4().to_string(),
        "serverVersion": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().timestamp_millis(),
    });
    if socket
        .send(Message::Text(welcome.to_string()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(envelope) = event else { break };
                let Ok(text) = serde_json::to_string(&envelope.event) else {
                    continue;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(request) if request.kind.eq_ignore_ascii_case("ping") => {
                            let pong = json!({
                                "type": "pong",
                                "timestamp": Utc::now().timestamp_millis(),
                            });
                            if socket.send(Message::Text(pong.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Ok(request) => {
                            debug!(target: "ws", "Unhandled client message: {}", request.kind);
                        }
                        Err(_) => warn!(target: "ws", "Failed to parse client websocket message"),
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = socket.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(target: "ws", ?frame, "WebSocket closed by client");
                    break;
                }
                Some(Ok(Message::Binary(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Err(err)) => {
                    error!(?err, "WebSocket error");
                    break;
                }
                None => break,
            },
        }
    }
}
