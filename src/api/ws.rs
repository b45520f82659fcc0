//! Escalation feed over WebSocket.
//!
//! On connect the client gets every unresolved event, then a live stream of
//! raised and resolved events. Clients only listen; text frames are ignored.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::AppState;
use crate::escalation::{EscalationLog, FeedMessage};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("Escalation feed client connecting");
    let log = Arc::clone(&state.desk.escalations);
    ws.on_upgrade(move |socket| handle_socket(socket, log))
}

async fn send_feed(socket: &mut WebSocket, msg: &FeedMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize feed message");
            true
        }
    }
}

async fn sync(socket: &mut WebSocket, log: &EscalationLog) -> bool {
    let events = log.unresolved().await;
    send_feed(socket, &FeedMessage::EscalationsSync { events }).await
}

async fn handle_socket(mut socket: WebSocket, log: Arc<EscalationLog>) {
    // Subscribe before the sync so nothing raised in between is lost.
    let mut rx = log.subscribe();

    if !sync(&mut socket, &log).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }
    info!("Escalation feed client connected");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if !send_feed(&mut socket, &msg).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "Feed client lagged behind broadcast");
                        if !sync(&mut socket, &log).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Escalation feed client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("Escalation feed connection closed");
}
