//! Seam to the external peer-connection primitive.
//!
//! The negotiation core never touches media. It drives an implementation of
//! [`PeerConnection`] (a WebRTC stack, or a fake in tests) and listens to the
//! [`ConnectionEvent`]s that implementation emits.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::tracks::{LocalTrack, MediaKind};
use crate::signal::{ClientId, IceCandidate, SessionDescription};
use crate::Result;

/// Handle to one outbound track slot of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub u64);

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create an offer and apply it as the local description
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer to the applied remote offer and apply it locally
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;

    /// Discard the local offer that has not been answered yet
    async fn rollback(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId>;

    /// Swap the track behind an existing sender without renegotiating
    async fn replace_track(&self, sender: SenderId, track: &LocalTrack) -> Result<()>;

    async fn remove_track(&self, sender: SenderId) -> Result<()>;

    /// Best-effort encoder cap; may be unsupported
    async fn set_max_bitrate(&self, sender: SenderId, kbps: u32) -> Result<()>;

    async fn close(&self);
}

/// Creates one primitive per remote peer
pub trait ConnectionFactory: Send + Sync {
    fn create(&self, peer_id: &str, events: ConnectionEvents) -> Result<Box<dyn PeerConnection>>;
}

/// Track received from the remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A local ICE candidate was gathered and must be relayed
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    RemoteTrackRemoved(String),
    /// The transport failed irrecoverably
    Failed(String),
}

/// One event from a primitive, with the peer and connection it came from
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub peer_id: ClientId,
    /// Distinguishes successive connections to the same peer
    pub connection_id: u64,
    pub event: ConnectionEvent,
}

pub type EventSender = mpsc::UnboundedSender<TaggedEvent>;

/// Sink handed to a primitive for reporting its events
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    peer_id: ClientId,
    connection_id: u64,
    tx: EventSender,
}

impl ConnectionEvents {
    pub fn new(peer_id: ClientId, connection_id: u64, tx: EventSender) -> Self {
        Self {
            peer_id,
            connection_id,
            tx,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn emit(&self, event: ConnectionEvent) {
        let tagged = TaggedEvent {
            peer_id: self.peer_id.clone(),
            connection_id: self.connection_id,
            event,
        };
        if self.tx.send(tagged).is_err() {
            debug!("Participant for {} is gone, dropping event", self.peer_id);
        }
    }
}
