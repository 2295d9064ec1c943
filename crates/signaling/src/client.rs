use crate::error::SignalingError;
use crate::model::{ClientEvent, ClientId, RelayEnvelope, RoomId, ServerEvent, SignalingMessage};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Websocket client for the signaling server.
pub struct SignalingClient {
    id: ClientId,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SignalingClient {
    /// Connect and wait for the server to assign our id.
    pub async fn connect(url: &str) -> Result<Self, SignalingError> {
        let (ws, _) = connect_async(url).await?;
        let mut client = Self {
            id: ClientId::from(""),
            ws,
        };

        match client.next_event().await? {
            Some(ServerEvent::ClientId(id)) => {
                tracing::info!("Signaling connected as {}", id);
                client.id = id;
                Ok(client)
            }
            Some(other) => Err(SignalingError::Unexpected(format!("{other:?}"))),
            None => Err(SignalingError::Closed),
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub async fn send(&mut self, event: &ClientEvent) -> Result<(), SignalingError> {
        let text = serde_json::to_string(event)?;
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    pub async fn ping(&mut self) -> Result<(), SignalingError> {
        self.send(&ClientEvent::Ping).await
    }

    pub async fn connect_to(&mut self, target: &ClientId) -> Result<(), SignalingError> {
        self.send(&ClientEvent::ConnectTo(target.clone())).await
    }

    pub async fn join(&mut self, room: &RoomId) -> Result<(), SignalingError> {
        self.send(&ClientEvent::Join(room.clone())).await
    }

    /// Relay a connection-setup message to the other member of `room`.
    pub async fn relay(&mut self, room: &RoomId, message: &SignalingMessage) -> Result<(), SignalingError> {
        let payload = serde_json::to_value(message)?;
        self.send(&ClientEvent::Message(RelayEnvelope {
            payload,
            room: room.clone(),
        }))
        .await
    }

    /// Next server event, or `None` once the server closes the socket.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>, SignalingError> {
        while let Some(msg) = self.ws.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
                Message::Close(_) => return Ok(None),
                // Pings are answered by tungstenite itself.
                _ => continue,
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), SignalingError> {
        self.ws.close(None).await?;
        Ok(())
    }
}
