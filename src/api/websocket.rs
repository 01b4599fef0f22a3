//! WebSocket bridge between a browser client and the multiplexer.
//!
//! Each socket is one connection. Inbound text frames are parsed as
//! [`ClientMessage`]s and dispatched; everything the multiplexer emits for
//! the connection is written back as JSON text frames by a writer task.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::handlers::AppState;
use crate::protocol::{client_channel, ClientMessage, ServerEvent};
use crate::session::ConnectionId;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one client connection until it closes.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = ConnectionId::new();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = client_channel();

    if let Err(e) = state.mux.open_connection(id, tx.clone()) {
        warn!(connection = %id, error = %e, "failed to register connection");
        return;
    }
    info!(connection = %id, "client connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(connection = %id, error = %e, "socket read failed");
                break;
            }
        };

        let message: ClientMessage = match serde_json::from_str(text.as_str()) {
            Ok(m) => m,
            Err(e) => {
                let _ = tx.send(ServerEvent::parse_error(e)).await;
                continue;
            }
        };

        if let Err(e) = state.mux.dispatch(id, message).await {
            debug!(connection = %id, error = %e, "message not handled");
        }
    }

    // Stop the writer first so pumps waiting on a full queue give up.
    writer.abort();
    drop(tx);
    if let Err(e) = state.mux.close_connection(id).await {
        debug!(connection = %id, error = %e, "close after disconnect");
    }
    info!(connection = %id, "client disconnected");
}
