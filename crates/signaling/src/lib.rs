//! Signaling for two-party sessions: who is online, who pairs with whom,
//! and opaque relay of connection-setup messages inside a room.

pub mod client;
pub mod error;
pub mod hub;
pub mod model;
pub mod pairing;
pub mod registry;
pub mod rooms;

pub use client::SignalingClient;
pub use error::SignalingError;
pub use hub::{HubConfig, SignalingHub};
pub use model::{ClientEvent, ClientId, JoinAssignment, RelayEnvelope, RoomId, ServerEvent, SignalingMessage};
pub use pairing::{InitiatorPolicy, PairingCoordinator, PairingOutcome};
pub use registry::SessionRegistry;
pub use rooms::RoomTable;
