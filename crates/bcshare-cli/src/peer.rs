//! Pairing through the signaling server and setting up the direct TCP channel.

use anyhow::{bail, Context, Result};
use signaling::{ClientId, JoinAssignment, RoomId, ServerEvent, SignalingClient, SignalingMessage};
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use transport::{StreamReceiver, StreamSink};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait until the pairing room has both members.
///
/// `requester` is the side that sent `connect-to`; the server already put it
/// in the room, so only the other side joins.
pub async fn await_pairing(signal: &mut SignalingClient, requester: bool) -> Result<JoinAssignment> {
    let mut assignment: Option<JoinAssignment> = None;
    let mut ready: Option<RoomId> = None;

    loop {
        if let (Some(a), Some(room)) = (&assignment, &ready) {
            if &a.room == room {
                return Ok(a.clone());
            }
        }

        match next_event(signal).await? {
            ServerEvent::Join(a) => {
                tracing::info!("Paired in room {} (initiator: {})", a.room, a.is_initiator);
                if !requester {
                    signal.join(&a.room).await?;
                }
                assignment = Some(a);
            }
            ServerEvent::Ready(room) => ready = Some(room),
            ServerEvent::PeerUnreachable(id) => bail!("Peer {} is not connected", id),
            ServerEvent::Error(msg) => bail!("Signaling server refused: {}", msg),
            other => tracing::debug!("Ignoring {:?} while pairing", other),
        }
    }
}

/// Ask the server to pair us with `target` and wait for the room.
pub async fn pair_with(signal: &mut SignalingClient, target: &ClientId) -> Result<JoinAssignment> {
    signal.connect_to(target).await?;
    await_pairing(signal, true).await
}

/// Open the direct channel: the initiator listens and offers its address, the
/// other side answers and dials.
pub async fn open_channel(
    signal: &mut SignalingClient,
    assignment: &JoinAssignment,
    host: IpAddr,
) -> Result<(StreamSink, StreamReceiver)> {
    if assignment.is_initiator {
        let listener = TcpListener::bind((host, 0))
            .await
            .with_context(|| format!("Failed to listen on {}", host))?;
        let addr = listener.local_addr()?;
        signal
            .relay(&assignment.room, &SignalingMessage::Offer { addr: addr.to_string() })
            .await?;
        tracing::info!("Offered {}", addr);

        loop {
            match next_message(signal).await? {
                SignalingMessage::Answer => break,
                other => tracing::debug!("Ignoring {:?} before answer", other),
            }
        }

        let (stream, peer) = tokio::time::timeout(CONNECT_TIMEOUT, listener.accept())
            .await
            .context("Peer never connected")??;
        stream.set_nodelay(true)?;
        tracing::info!("Peer connected from {}", peer);
        Ok(transport::split(stream))
    } else {
        let addr = loop {
            match next_message(signal).await? {
                SignalingMessage::Offer { addr } => break addr,
                other => tracing::debug!("Ignoring {:?} before offer", other),
            }
        };
        signal.relay(&assignment.room, &SignalingMessage::Answer).await?;

        tokio::time::timeout(CONNECT_TIMEOUT, transport::connect(addr.as_str()))
            .await
            .with_context(|| format!("Timed out dialing {}", addr))?
            .with_context(|| format!("Failed to dial {}", addr))
    }
}

async fn next_event(signal: &mut SignalingClient) -> Result<ServerEvent> {
    signal
        .next_event()
        .await?
        .context("Signaling server closed the connection")
}

/// Next relayed connection-setup message; other events are skipped.
async fn next_message(signal: &mut SignalingClient) -> Result<SignalingMessage> {
    loop {
        match next_event(signal).await? {
            ServerEvent::Message(payload) => match serde_json::from_value(payload) {
                Ok(msg) => return Ok(msg),
                Err(e) => tracing::warn!("Unrecognized relay payload: {}", e),
            },
            ServerEvent::Error(msg) => bail!("Signaling server refused: {}", msg),
            other => tracing::debug!("Ignoring {:?} during negotiation", other),
        }
    }
}
