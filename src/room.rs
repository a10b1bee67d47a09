use crate::signal::{ClientId, RoomId};

/// A named room and its members, in join order
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    members: Vec<ClientId>,
}

impl Room {
    pub fn new(id: impl Into<RoomId>) -> Self {
        Room {
            id: id.into(),
            members: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `false` if the client was already a member
    pub fn insert(&mut self, client: &str) -> bool {
        if self.contains(client) {
            return false;
        }
        self.members.push(client.to_string());
        true
    }

    pub fn remove(&mut self, client: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|id| id != client);
        self.members.len() != before
    }

    pub fn contains(&self, client: &str) -> bool {
        self.members.iter().any(|id| id == client)
    }

    pub fn members(&self) -> &[ClientId] {
        &self.members
    }

    /// Every member except `client`
    pub fn others<'a>(&'a self, client: &'a str) -> impl Iterator<Item = &'a ClientId> + 'a {
        self.members.iter().filter(move |id| id.as_str() != client)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
