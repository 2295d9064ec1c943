use crate::model::RoomId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),
    #[error("room {0} is full")]
    RoomFull(RoomId),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("connection closed")]
    Closed,
    #[error("unexpected event: {0}")]
    Unexpected(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SignalingError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
