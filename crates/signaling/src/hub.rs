use crate::model::{ClientEvent, ClientId, RelayEnvelope, RoomId, ServerEvent};
use crate::pairing::{InitiatorPolicy, PairingCoordinator, PairingOutcome};
use crate::registry::SessionRegistry;
use crate::rooms::RoomTable;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    pub initiator: InitiatorPolicy,
    /// Tell a requester when its pairing target is not connected.
    pub notify_unreachable: bool,
}

/// Server side of the signaling protocol.
///
/// Transport-agnostic: the websocket layer calls `connect` once per socket,
/// forwards each text frame to `handle_text`, drains the returned receiver
/// into the socket, and calls `disconnect` when the socket goes away.
pub struct SignalingHub {
    registry: SessionRegistry,
    rooms: RoomTable,
    pairing: PairingCoordinator,
    notify_unreachable: bool,
}

impl SignalingHub {
    pub fn new(cfg: HubConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            rooms: RoomTable::new(),
            pairing: PairingCoordinator::new(cfg.initiator),
            notify_unreachable: cfg.notify_unreachable,
        }
    }

    /// Register a new connection. Its id is the first event on the receiver.
    pub fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.register(tx);
        self.registry.send(&id, ServerEvent::ClientId(id.clone()));
        tracing::info!("Client {} connected ({} online)", id, self.registry.len());
        (id, rx)
    }

    /// Handle one raw text frame. Malformed frames get an `error` reply.
    pub fn handle_text(&self, from: &ClientId, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(from, event),
            Err(e) => {
                tracing::debug!("Malformed frame from {}: {}", from, e);
                self.registry.send(from, ServerEvent::Error(format!("malformed frame: {e}")));
            }
        }
    }

    pub fn handle(&self, from: &ClientId, event: ClientEvent) {
        match event {
            ClientEvent::Ping => {
                self.registry.send(from, ServerEvent::Pong);
            }
            ClientEvent::ConnectTo(target) => self.connect_to(from, target),
            ClientEvent::Join(room) => self.join(from, room),
            ClientEvent::Message(envelope) => self.relay(from, envelope),
        }
    }

    /// Forget a connection and every room it was in.
    pub fn disconnect(&self, id: &ClientId) {
        self.registry.remove(id);
        let left = self.rooms.leave_all(id);
        tracing::info!(
            "Client {} disconnected, left {} room(s) ({} online)",
            id,
            left.len(),
            self.registry.len()
        );
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomTable {
        &self.rooms
    }

    fn connect_to(&self, from: &ClientId, target: ClientId) {
        match self.pairing.request_connect(&self.registry, &self.rooms, from, &target) {
            PairingOutcome::Paired(_) => {}
            PairingOutcome::Unreachable => {
                tracing::debug!("{} asked for unreachable peer {}", from, target);
                if self.notify_unreachable {
                    self.registry.send(from, ServerEvent::PeerUnreachable(target));
                }
            }
        }
    }

    fn join(&self, from: &ClientId, room: RoomId) {
        match self.rooms.join(&room, from) {
            Ok(members) => {
                tracing::debug!("{} joined room {} ({} member(s))", from, room, members.len());
                for member in &members {
                    self.registry.send(member, ServerEvent::Ready(room.clone()));
                }
            }
            Err(e) => {
                tracing::warn!("{} refused from room {}: {}", from, room, e);
                self.registry.send(from, ServerEvent::Error(e.to_string()));
            }
        }
    }

    fn relay(&self, from: &ClientId, envelope: RelayEnvelope) {
        let Some(recipients) = self.rooms.others(&envelope.room, from) else {
            tracing::debug!("Dropping relay from {} to room {} it has not joined", from, envelope.room);
            return;
        };
        if recipients.is_empty() {
            tracing::debug!("Room {} has no peer yet, message dropped", envelope.room);
        }
        for recipient in &recipients {
            self.registry.send(recipient, ServerEvent::Message(envelope.payload.clone()));
        }
    }
}
