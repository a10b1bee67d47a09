//! Participant-side negotiation: sessions, media tracks and the hub client.

pub mod client;
pub mod connection;
pub mod negotiation;
pub mod participant;
pub mod registry;
pub mod session;
pub mod tracks;

pub use client::SignalClient;
pub use connection::{
    ConnectionEvent, ConnectionEvents, ConnectionFactory, EventSender, PeerConnection, RemoteTrack,
    SenderId, TaggedEvent,
};
pub use negotiation::{negotiate, NegotiationEvent, NegotiationState, Outbound, Role};
pub use participant::{Command, Participant, ParticipantEvent};
pub use registry::PeerRegistry;
pub use session::PeerSession;
pub use tracks::{
    LocalTrack, MediaConstraints, MediaKind, MediaSource, MediaTrack, TrackCoordinator,
    TrackPurpose,
};
