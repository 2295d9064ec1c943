use crate::model::{ClientId, ServerEvent};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Where the server pushes events for one connection.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Live signaling connections keyed by client id.
#[derive(Default)]
pub struct SessionRegistry {
    clients: DashMap<ClientId, Outbox>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a fresh random id to `outbox`, retrying on the rare collision.
    pub fn register(&self, outbox: Outbox) -> ClientId {
        loop {
            let id = ClientId::random();
            if self.bind(id.clone(), outbox.clone()) {
                return id;
            }
            tracing::debug!("Client id collision on {}, retrying", id);
        }
    }

    /// Bind a specific id. Returns false if it is taken.
    pub fn bind(&self, id: ClientId, outbox: Outbox) -> bool {
        match self.clients.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(outbox);
                true
            }
        }
    }

    pub fn lookup(&self, id: &ClientId) -> Option<Outbox> {
        self.clients.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    /// Push an event to a client. False if it is gone.
    pub fn send(&self, id: &ClientId, event: ServerEvent) -> bool {
        match self.lookup(id) {
            Some(outbox) => outbox.send(event).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, id: &ClientId) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
