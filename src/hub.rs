//! Signalling hub: room membership and relay of negotiation messages.
//!
//! The hub is transport-agnostic. Each connected client is represented by an
//! unbounded queue of [`ServerMessage`]s; the WebSocket layer in
//! [`crate::server`] drains that queue into the socket. Because every sender
//! is served by a single reader task and each recipient has a single FIFO
//! queue, messages from one sender reach a given recipient in emission order.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::room::Room;
use crate::signal::{ClientId, ClientMessage, RoomId, Route, ServerMessage, SignalKind};
use crate::{Error, Result};

pub type ClientTx = mpsc::UnboundedSender<ServerMessage>;

struct Client {
    tx: ClientTx,
    room: Option<RoomId>,
}

#[derive(Default)]
pub struct Hub {
    clients: HashMap<ClientId, Client>,
    rooms: HashMap<RoomId, Room>,
    ice_servers: Vec<String>,
}

impl Hub {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Hub {
            clients: HashMap::new(),
            rooms: HashMap::new(),
            ice_servers,
        }
    }

    /// Register a new transport connection under a fresh id and greet it
    pub fn connect(&mut self, tx: ClientTx) -> ClientId {
        let client_id = Uuid::new_v4().to_string();
        self.connect_with_id(client_id.clone(), tx);
        client_id
    }

    pub fn connect_with_id(&mut self, client_id: ClientId, tx: ClientTx) {
        info!("Client {} connected", client_id);
        let welcome = ServerMessage::Welcome {
            client_id: client_id.clone(),
            ice_servers: self.ice_servers.clone(),
        };
        let _ = tx.send(welcome);
        self.clients.insert(client_id, Client { tx, room: None });
    }

    /// Apply one frame received from `from`
    pub fn handle(&mut self, from: &str, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::Join { room } => self.join(from, &room).map(|_| ()),
            ClientMessage::Leave { room } => {
                self.leave(from, &room);
                Ok(())
            }
            relay => {
                if let Some((kind, route, payload)) = relay.into_relay() {
                    self.relay(kind, from, route, payload);
                }
                Ok(())
            }
        }
    }

    /// Add `client` to `room`. Returns `Ok(false)` when it already was a member.
    ///
    /// A client lives in at most one room: joining a second room leaves the
    /// first one. Other members get `peer-joined`, the joiner gets the list of
    /// members that were already there.
    pub fn join(&mut self, client: &str, room_id: &str) -> Result<bool> {
        if room_id.is_empty() {
            return Err(Error::SignalingError("room id must not be empty".to_string()));
        }
        let current = match self.clients.get(client) {
            Some(c) => c.room.clone(),
            None => return Err(Error::PeerNotFound(client.to_string())),
        };
        match current {
            Some(ref current) if current == room_id => return Ok(false),
            Some(current) => {
                self.leave(client, &current);
            }
            None => {}
        }

        let room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id));
        room.insert(client);
        let others: Vec<ClientId> = room.others(client).cloned().collect();
        info!(
            "Client {} joined room {} ({} members)",
            client,
            room_id,
            room.len()
        );

        if let Some(c) = self.clients.get_mut(client) {
            c.room = Some(room_id.to_string());
        }

        let joined = ServerMessage::PeerJoined {
            room: room_id.to_string(),
            peer_id: client.to_string(),
        };
        for member in &others {
            self.send(member, joined.clone());
        }
        self.send(
            client,
            ServerMessage::RoomMembers {
                room: room_id.to_string(),
                members: others,
            },
        );
        Ok(true)
    }

    /// Remove `client` from `room`, notifying the remaining members
    pub fn leave(&mut self, client: &str, room_id: &str) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if !room.remove(client) {
            return false;
        }
        let remaining: Vec<ClientId> = room.members().to_vec();
        if room.is_empty() {
            self.rooms.remove(room_id);
            debug!("Room {} is empty, dropped", room_id);
        }
        if let Some(c) = self.clients.get_mut(client) {
            c.room = None;
        }
        info!("Client {} left room {}", client, room_id);

        let left = ServerMessage::PeerLeft {
            room: room_id.to_string(),
            peer_id: client.to_string(),
        };
        for member in &remaining {
            self.send(member, left.clone());
        }
        true
    }

    /// Drop a client entirely, leaving its room first
    pub fn disconnect(&mut self, client: &str) {
        let room = self.clients.get(client).and_then(|c| c.room.clone());
        if let Some(room) = room {
            self.leave(client, &room);
        }
        if self.clients.remove(client).is_some() {
            info!("Client {} disconnected", client);
        }
    }

    /// Forward `payload` from `from` along `route`, returning the number of
    /// recipients it was queued for. The payload is never inspected.
    pub fn relay(&self, kind: SignalKind, from: &str, route: Route, payload: Value) -> usize {
        let Some(room_id) = self.clients.get(from).and_then(|c| c.room.as_deref()) else {
            debug!("Dropping {} from {}: not in a room", kind.as_str(), from);
            return 0;
        };
        let Some(room) = self.rooms.get(room_id) else {
            return 0;
        };

        match route {
            Route::Target(target) => {
                if target == from || !room.contains(&target) {
                    debug!(
                        "Dropping {} from {}: target {} not in room {}",
                        kind.as_str(),
                        from,
                        target,
                        room_id
                    );
                    return 0;
                }
                debug!("Relaying {} {} -> {}", kind.as_str(), from, target);
                usize::from(self.send(&target, kind.into_message(from.to_string(), payload)))
            }
            Route::Broadcast { room: named } => {
                if let Some(named) = named {
                    if named != room_id {
                        debug!(
                            "Dropping {} from {}: not a member of room {}",
                            kind.as_str(),
                            from,
                            named
                        );
                        return 0;
                    }
                }
                let msg = kind.into_message(from.to_string(), payload);
                let mut delivered = 0;
                for member in room.others(from) {
                    if self.send(member, msg.clone()) {
                        delivered += 1;
                    }
                }
                debug!(
                    "Relayed {} from {} to {} members of {}",
                    kind.as_str(),
                    from,
                    delivered,
                    room_id
                );
                delivered
            }
        }
    }

    /// Queue a message for one client. A closed queue means the client is
    /// going away; its disconnect cleans up.
    pub fn send(&self, client: &str, msg: ServerMessage) -> bool {
        match self.clients.get(client) {
            Some(c) => {
                if c.tx.send(msg).is_err() {
                    warn!("Queue for client {} is closed", client);
                    return false;
                }
                true
            }
            None => false,
        }
    }

    pub fn members(&self, room_id: &str) -> Vec<ClientId> {
        self.rooms
            .get(room_id)
            .map(|r| r.members().to_vec())
            .unwrap_or_default()
    }

    pub fn room_of(&self, client: &str) -> Option<&str> {
        self.clients.get(client).and_then(|c| c.room.as_deref())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
