//! WebSocket Handler

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::relay::{ConnectionGuard, Relay};

/// Upgrade handler for `/` and `/ws`
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let max_message = state.relay.config().max_message_bytes;
    let relay = state.relay.clone();
    ws.max_message_size(max_message)
        .max_frame_size(max_message)
        .on_upgrade(move |socket| handle_socket(socket, relay))
}

/// Drive one relay connection until either side closes it.
pub async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (transport, mut rx) = relay.open_transport();
    let conn_id = transport.id();
    let guard = ConnectionGuard::new(relay.clone(), conn_id);
    info!(conn_id = %conn_id, "Connection opened");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task to send queued records to the socket
    let sender_task = async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender
                .send(Message::Text(payload.as_ref().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_sender.close().await;
    };

    // Task to handle incoming messages
    let input_relay = relay.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    input_relay.handle_text(&transport, text.as_str()).await;
                }
                Ok(Message::Binary(data)) => {
                    debug!(conn_id = %conn_id, len = data.len(), "Ignoring binary message");
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(conn_id = %conn_id, "Sender task ended"),
        _ = input_task => debug!(conn_id = %conn_id, "Input task ended"),
    }

    guard.finish().await;
    info!(conn_id = %conn_id, "Connection closed");
}
