use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of generated client and room ids.
pub const ID_LEN: usize = 8;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// 8 characters of lowercase base36, about 41 bits of entropy.
fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn random() -> Self {
                Self(random_token())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(
    /// Ephemeral identifier of one signaling connection.
    ClientId
);

opaque_id!(
    /// Routing scope shared by the two peers of one pairing.
    RoomId
);

/// Frames sent by clients. Wire shape: `{"event": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Ping,
    ConnectTo(ClientId),
    Join(RoomId),
    Message(RelayEnvelope),
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ClientId(ClientId),
    Pong,
    Join(JoinAssignment),
    Ready(RoomId),
    /// Opaque payload relayed from the other room member.
    Message(serde_json::Value),
    PeerUnreachable(ClientId),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub payload: serde_json::Value,
    pub room: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAssignment {
    pub room: RoomId,
    pub is_initiator: bool,
}

/// Connection-setup messages carried inside relay payloads.
///
/// The hub never looks at these; only the endpoints do. `addr` is a
/// `host:port` the other side can dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer { addr: String },
    Answer,
    Candidate { addr: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_random_ids_are_base36() {
        let id = ClientId::random();
        assert_eq!(id.as_str().len(), ID_LEN);
        assert!(id.as_str().bytes().all(|b| ALPHABET.contains(&b)));
        assert_ne!(RoomId::random(), RoomId::random());
    }

    #[test]
    fn test_client_event_wire_shape() {
        let parsed: ClientEvent = serde_json::from_value(json!({"event": "connect-to", "data": "x7k2pq"})).unwrap();
        assert_eq!(parsed, ClientEvent::ConnectTo("x7k2pq".into()));

        let parsed: ClientEvent = serde_json::from_value(json!({"event": "ping"})).unwrap();
        assert_eq!(parsed, ClientEvent::Ping);

        let parsed: ClientEvent = serde_json::from_value(json!({
            "event": "message",
            "data": {"payload": {"type": "offer", "addr": "10.0.0.2:4000"}, "room": "r00m0001"}
        }))
        .unwrap();
        let ClientEvent::Message(env) = parsed else { panic!("not a message") };
        assert_eq!(env.room.as_str(), "r00m0001");
        let msg: SignalingMessage = serde_json::from_value(env.payload).unwrap();
        assert_eq!(msg, SignalingMessage::Offer { addr: "10.0.0.2:4000".into() });
    }

    #[test]
    fn test_server_event_wire_shape() {
        let join = ServerEvent::Join(JoinAssignment { room: "abc".into(), is_initiator: true });
        assert_eq!(
            serde_json::to_value(&join).unwrap(),
            json!({"event": "join", "data": {"room": "abc", "is_initiator": true}})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::ClientId("a1".into())).unwrap(),
            json!({"event": "client-id", "data": "a1"})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::PeerUnreachable("zz".into())).unwrap(),
            json!({"event": "peer-unreachable", "data": "zz"})
        );
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"shout","data":1}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>("not json").is_err());
    }
}
