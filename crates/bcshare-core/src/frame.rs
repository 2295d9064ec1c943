//! Data-channel frames.
//!
//! A channel carries two kinds of messages, mirroring a WebRTC data channel:
//! - text frames hold a JSON [`ControlMessage`] (metadata, keep-alive, cancel)
//! - binary frames hold raw file bytes
//!
//! For byte-stream transports each frame is written as
//! `[kind: u8][len: u32 BE][payload]`.

use crate::metadata::FileMetadata;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted from the wire.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const KIND_TEXT: u8 = 0;
const KIND_BINARY: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn control(msg: &ControlMessage) -> Result<Self, serde_json::Error> {
        Ok(Frame::Text(serde_json::to_string(msg)?))
    }

    /// Payload length, used for buffered-amount accounting.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Messages exchanged as text frames.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Announces the next file; always precedes its binary frames.
    Metadata(FileMetadata),
    Ping,
    Pong,
    /// The sender abandoned the file currently in flight.
    Cancel,
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Write one frame. Flushes so the peer sees it without waiting for more.
pub async fn write_frame<T: AsyncWrite + Unpin + Send>(
    transport: &mut T,
    frame: &Frame,
) -> std::io::Result<()> {
    let (kind, payload): (u8, &[u8]) = match frame {
        Frame::Text(s) => (KIND_TEXT, s.as_bytes()),
        Frame::Binary(b) => (KIND_BINARY, b.as_ref()),
    };

    if payload.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "frame too large",
        ));
    }

    transport.write_u8(kind).await?;
    transport.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    transport.write_all(payload).await?;
    transport.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<T: AsyncRead + Unpin + Send>(
    transport: &mut T,
) -> std::io::Result<Option<Frame>> {
    let kind = match transport.read_u8().await {
        Ok(kind) => kind,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut lenb = [0u8; 4];
    transport.read_exact(&mut lenb).await?;
    let len = u32::from_be_bytes(lenb) as usize;

    // Sanity check to prevent memory exhaustion
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }

    let mut buf = vec![0u8; len];
    transport.read_exact(&mut buf).await?;

    match kind {
        KIND_TEXT => String::from_utf8(buf)
            .map(|s| Some(Frame::Text(s)))
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "text frame is not utf-8")),
        KIND_BINARY => Ok(Some(Frame::Binary(Bytes::from(buf)))),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown frame kind {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_are_tagged() {
        let json = serde_json::to_string(&ControlMessage::Metadata(FileMetadata::new("a.txt", 5))).unwrap();
        assert_eq!(json, r#"{"type":"metadata","name":"a.txt","size":5}"#);
        assert_eq!(ControlMessage::parse(r#"{"type":"ping"}"#).unwrap(), ControlMessage::Ping);
        assert!(ControlMessage::parse(r#"{"type":"offer"}"#).is_err());
    }

    #[tokio::test]
    async fn frames_cross_a_stream_in_order() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let frames = vec![
            Frame::control(&ControlMessage::Ping).unwrap(),
            Frame::Binary(Bytes::from_static(b"\x00\x01\x02")),
            Frame::Binary(Bytes::new()),
        ];

        let expected = frames.clone();
        let writer = tokio::spawn(async move {
            for f in &frames {
                write_frame(&mut a, f).await.unwrap();
            }
        });

        for f in expected {
            assert_eq!(read_frame(&mut b).await.unwrap(), Some(f));
        }
        writer.await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            a.write_u8(KIND_BINARY).await.unwrap();
            a.write_all(&(u32::MAX).to_be_bytes()).await.unwrap();
        });
        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u8(KIND_TEXT).await.unwrap();
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        assert!(read_frame(&mut b).await.is_err());
    }
}
