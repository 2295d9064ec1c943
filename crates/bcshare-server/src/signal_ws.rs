use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use signaling::SignalingHub;
use std::sync::Arc;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// One signaling connection: socket frames in, hub events out.
async fn handle_socket(socket: WebSocket, hub: Arc<SignalingHub>) {
    let (id, mut outbox) = hub.connect();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Dropping unserializable event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => hub.handle_text(&id, &text),
            Ok(Message::Close(_)) => break,
            // Websocket pings are answered by axum.
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Socket for {} failed: {}", id, e);
                break;
            }
        }
    }

    hub.disconnect(&id);
    writer.abort();
}
