use crate::error::SignalingError;
use crate::model::{ClientId, RoomId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;

/// Members a room can hold.
pub const MAX_MEMBERS: usize = 2;

/// Room membership with explicit counts; a room disappears when its last
/// member leaves.
///
/// Lock order is always `rooms` before `memberships`, and no guard on one
/// map is held while the other is touched.
#[derive(Default)]
pub struct RoomTable {
    rooms: DashMap<RoomId, Vec<ClientId>>,
    memberships: DashMap<ClientId, HashSet<RoomId>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room with `owner` as its first member.
    pub fn open(&self, owner: &ClientId) -> RoomId {
        let room = loop {
            let id = RoomId::random();
            if let Entry::Vacant(slot) = self.rooms.entry(id.clone()) {
                slot.insert(vec![owner.clone()]);
                break id;
            }
        };
        self.memberships.entry(owner.clone()).or_default().insert(room.clone());
        room
    }

    /// Subscribe `client` to `room`, returning the members afterwards.
    /// Joining twice is a no-op. Only rooms made by `open` and not yet
    /// discarded can be joined.
    pub fn join(&self, room: &RoomId, client: &ClientId) -> Result<Vec<ClientId>, SignalingError> {
        let members = {
            let mut members = self
                .rooms
                .get_mut(room)
                .ok_or_else(|| SignalingError::UnknownRoom(room.clone()))?;
            if !members.contains(client) {
                if members.len() >= MAX_MEMBERS {
                    return Err(SignalingError::RoomFull(room.clone()));
                }
                members.push(client.clone());
            }
            members.clone()
        };
        self.memberships.entry(client.clone()).or_default().insert(room.clone());
        Ok(members)
    }

    /// Everyone in `room` except `sender`, or `None` if `sender` is not a member.
    pub fn others(&self, room: &RoomId, sender: &ClientId) -> Option<Vec<ClientId>> {
        let members = self.rooms.get(room)?;
        if !members.contains(sender) {
            return None;
        }
        Some(members.iter().filter(|m| *m != sender).cloned().collect())
    }

    pub fn members(&self, room: &RoomId) -> Vec<ClientId> {
        self.rooms.get(room).map(|m| m.clone()).unwrap_or_default()
    }

    pub fn is_member(&self, room: &RoomId, client: &ClientId) -> bool {
        self.rooms.get(room).is_some_and(|m| m.contains(client))
    }

    pub fn leave(&self, room: &RoomId, client: &ClientId) {
        if let Some(mut rooms) = self.memberships.get_mut(client) {
            rooms.remove(room);
        }
        self.memberships.remove_if(client, |_, rooms| rooms.is_empty());
        self.drop_member(room, client);
    }

    /// Remove `client` from every room it joined. Returns those rooms.
    pub fn leave_all(&self, client: &ClientId) -> Vec<RoomId> {
        let rooms: Vec<RoomId> = self
            .memberships
            .remove(client)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();
        for room in &rooms {
            self.drop_member(room, client);
        }
        rooms
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn drop_member(&self, room: &RoomId, client: &ClientId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.retain(|m| m != client);
        }
        if self.rooms.remove_if(room, |_, members| members.is_empty()).is_some() {
            tracing::debug!("Room {} discarded", room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ClientId {
        ClientId::from(s)
    }

    #[test]
    fn test_open_then_join_pairs_two_members() {
        let table = RoomTable::new();
        let room = table.open(&id("a"));
        let members = table.join(&room, &id("b")).unwrap();
        assert_eq!(members, vec![id("a"), id("b")]);
        assert_eq!(table.others(&room, &id("a")), Some(vec![id("b")]));
    }

    #[test]
    fn test_rejoin_is_idempotent_and_third_member_refused() {
        let table = RoomTable::new();
        let room = table.open(&id("a"));
        table.join(&room, &id("b")).unwrap();
        assert_eq!(table.join(&room, &id("b")).unwrap().len(), 2);
        assert!(matches!(table.join(&room, &id("c")), Err(SignalingError::RoomFull(_))));
        assert!(!table.is_member(&room, &id("c")));
    }

    #[test]
    fn test_join_refuses_rooms_never_opened_or_discarded() {
        let table = RoomTable::new();
        let made_up = RoomId::from("made-up");
        assert!(matches!(table.join(&made_up, &id("a")), Err(SignalingError::UnknownRoom(_))));
        assert_eq!(table.room_count(), 0);
        assert!(table.leave_all(&id("a")).is_empty());

        let room = table.open(&id("a"));
        table.leave(&room, &id("a"));
        assert!(matches!(table.join(&room, &id("b")), Err(SignalingError::UnknownRoom(_))));
        assert_eq!(table.room_count(), 0);
    }

    #[test]
    fn test_non_member_has_no_recipients() {
        let table = RoomTable::new();
        let room = table.open(&id("a"));
        assert_eq!(table.others(&room, &id("a")), Some(vec![]));
        assert_eq!(table.others(&room, &id("stranger")), None);
        assert_eq!(table.others(&RoomId::from("nowhere"), &id("a")), None);
    }

    #[test]
    fn test_room_discarded_when_empty() {
        let table = RoomTable::new();
        let room = table.open(&id("a"));
        table.join(&room, &id("b")).unwrap();
        let other = table.open(&id("a"));

        assert_eq!(table.leave_all(&id("a")).len(), 2);
        assert_eq!(table.room_count(), 1);
        assert_eq!(table.members(&room), vec![id("b")]);
        assert!(table.members(&other).is_empty());

        table.leave(&room, &id("b"));
        assert_eq!(table.room_count(), 0);
        assert!(table.leave_all(&id("b")).is_empty());
    }
}
