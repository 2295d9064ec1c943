use crate::model::{ClientId, JoinAssignment, RoomId, ServerEvent};
use crate::registry::SessionRegistry;
use crate::rooms::RoomTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of a pairing creates the offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitiatorPolicy {
    /// The peer being connected to leads.
    #[default]
    Callee,
    /// The lexicographically smaller client id leads.
    LowestId,
}

impl InitiatorPolicy {
    /// `(requester_is_initiator, target_is_initiator)`; exactly one is true.
    pub fn assign(self, requester: &ClientId, target: &ClientId) -> (bool, bool) {
        match self {
            InitiatorPolicy::Callee => (false, true),
            InitiatorPolicy::LowestId => {
                let requester_leads = requester < target;
                (requester_leads, !requester_leads)
            }
        }
    }
}

impl FromStr for InitiatorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "callee" => Ok(InitiatorPolicy::Callee),
            "lowest-id" => Ok(InitiatorPolicy::LowestId),
            other => Err(format!("unknown initiator policy '{other}' (expected callee or lowest-id)")),
        }
    }
}

impl fmt::Display for InitiatorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitiatorPolicy::Callee => f.write_str("callee"),
            InitiatorPolicy::LowestId => f.write_str("lowest-id"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub room: RoomId,
    pub requester: JoinAssignment,
    pub target: JoinAssignment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Paired(Pairing),
    Unreachable,
}

/// Turns a connect request into a room and two join assignments.
#[derive(Debug, Clone, Default)]
pub struct PairingCoordinator {
    policy: InitiatorPolicy,
}

impl PairingCoordinator {
    pub fn new(policy: InitiatorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> InitiatorPolicy {
        self.policy
    }

    /// Pair `from` with `to` and notify both. The requester is subscribed to
    /// the new room right away; the target joins with its own `join`.
    pub fn request_connect(
        &self,
        registry: &SessionRegistry,
        rooms: &RoomTable,
        from: &ClientId,
        to: &ClientId,
    ) -> PairingOutcome {
        if from == to || !registry.contains(to) {
            return PairingOutcome::Unreachable;
        }

        let room = rooms.open(from);
        let (requester_leads, target_leads) = self.policy.assign(from, to);
        let pairing = Pairing {
            requester: JoinAssignment { room: room.clone(), is_initiator: requester_leads },
            target: JoinAssignment { room: room.clone(), is_initiator: target_leads },
            room,
        };

        // The target may have vanished since the lookup above.
        if !registry.send(to, ServerEvent::Join(pairing.target.clone())) {
            rooms.leave(&pairing.room, from);
            return PairingOutcome::Unreachable;
        }
        registry.send(from, ServerEvent::Join(pairing.requester.clone()));

        tracing::info!("Paired {} with {} in room {}", from, to, pairing.room);
        PairingOutcome::Paired(pairing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_policies_pick_exactly_one_initiator() {
        let pairs = [("a", "b"), ("b", "a"), ("zz", "z0")];
        for policy in [InitiatorPolicy::Callee, InitiatorPolicy::LowestId] {
            for (r, t) in pairs {
                let (x, y) = policy.assign(&r.into(), &t.into());
                assert!(x ^ y, "{policy} on {r}/{t}");
            }
        }
        assert_eq!(InitiatorPolicy::Callee.assign(&"a".into(), &"b".into()), (false, true));
        assert_eq!(InitiatorPolicy::LowestId.assign(&"a".into(), &"b".into()), (true, false));
    }

    #[test]
    fn test_policy_parses_from_cli_text() {
        assert_eq!("lowest-id".parse::<InitiatorPolicy>().unwrap(), InitiatorPolicy::LowestId);
        assert_eq!(InitiatorPolicy::default().to_string().parse::<InitiatorPolicy>().unwrap(), InitiatorPolicy::Callee);
        assert!("random".parse::<InitiatorPolicy>().is_err());
    }

    #[test]
    fn test_request_connect_notifies_both() {
        let registry = SessionRegistry::new();
        let rooms = RoomTable::new();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        registry.bind("aaaa".into(), a_tx);
        registry.bind("bbbb".into(), b_tx);

        let coordinator = PairingCoordinator::default();
        let PairingOutcome::Paired(pairing) =
            coordinator.request_connect(&registry, &rooms, &"bbbb".into(), &"aaaa".into())
        else {
            panic!("expected pairing");
        };

        let ServerEvent::Join(to_a) = a_rx.try_recv().unwrap() else { panic!() };
        let ServerEvent::Join(to_b) = b_rx.try_recv().unwrap() else { panic!() };
        assert_eq!(to_a.room, to_b.room);
        assert!(to_a.is_initiator && !to_b.is_initiator);
        assert!(rooms.is_member(&pairing.room, &"bbbb".into()));
    }

    #[test]
    fn test_unknown_or_self_target_is_unreachable() {
        let registry = SessionRegistry::new();
        let rooms = RoomTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.bind("aaaa".into(), tx);

        let coordinator = PairingCoordinator::default();
        for target in ["nobody", "aaaa"] {
            assert_eq!(
                coordinator.request_connect(&registry, &rooms, &"aaaa".into(), &target.into()),
                PairingOutcome::Unreachable
            );
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(rooms.room_count(), 0);
    }
}
