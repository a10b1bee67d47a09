//! Client side of a conference: one participant's sessions, local media and
//! reaction to hub frames.
//!
//! Mesh topology. When a peer joins the room, every existing member opens an
//! initiator session toward it; the joiner learns the existing members from
//! `room-members` and prepares responder sessions that wait for their offers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{ConnectionEvent, ConnectionFactory, RemoteTrack, TaggedEvent};
use super::negotiation::Role;
use super::registry::PeerRegistry;
use super::tracks::{MediaSource, TrackCoordinator, TrackPurpose};
use crate::config::ParticipantConfig;
use crate::signal::{ClientId, ClientMessage, RoomId, ServerMessage, SignalKind};
use crate::{Error, Result};

/// Notifications for the application layer
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantEvent {
    Welcomed {
        client_id: ClientId,
        ice_servers: Vec<String>,
    },
    Joined {
        room: RoomId,
        members: Vec<ClientId>,
    },
    PeerJoined(ClientId),
    PeerLeft(ClientId),
    RemoteTrack {
        peer: ClientId,
        track: RemoteTrack,
    },
    RemoteTrackRemoved {
        peer: ClientId,
        track_id: String,
    },
    /// The session with this peer failed and was dropped
    SessionClosed(ClientId),
    MediaFailed {
        purpose: TrackPurpose,
        reason: String,
    },
    HubError(String),
}

/// Requests from the application layer, see [`Participant::run`]
pub enum Command {
    Join(RoomId),
    Leave,
    StartCamera(Arc<dyn MediaSource>),
    StopCamera,
    StartMicrophone(Arc<dyn MediaSource>),
    StopMicrophone,
    StartScreenShare(Arc<dyn MediaSource>),
    StopScreenShare,
    SetMicrophoneMuted(bool),
    SetTargetBitrate(TrackPurpose, u32),
    /// A local track was ended by the platform
    TrackEnded(String),
}

pub struct Participant {
    client_id: Option<ClientId>,
    room: Option<RoomId>,
    // set by the first join or leave; until then the hub may place us in a room
    membership_requested: bool,
    ice_servers: Vec<String>,
    registry: PeerRegistry,
    tracks: TrackCoordinator,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    connection_events: mpsc::UnboundedReceiver<TaggedEvent>,
    events: mpsc::UnboundedSender<ParticipantEvent>,
}

impl Participant {
    /// `outbound` carries frames to the hub, e.g. a [`super::SignalClient`]
    /// sender or an in-process channel.
    pub fn new(
        config: ParticipantConfig,
        factory: Arc<dyn ConnectionFactory>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> (Self, mpsc::UnboundedReceiver<ParticipantEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let bitrates = [
            TrackPurpose::Camera,
            TrackPurpose::Screen,
            TrackPurpose::Microphone,
        ]
        .into_iter()
        .filter_map(|p| config.bitrate_for(p).map(|kbps| (p, kbps)));

        let participant = Self {
            client_id: None,
            room: None,
            membership_requested: false,
            ice_servers: Vec::new(),
            registry: PeerRegistry::new(factory, conn_tx, outbound.clone()),
            tracks: TrackCoordinator::with_bitrates(bitrates),
            outbound,
            connection_events: conn_rx,
            events: events_tx,
        };
        (participant, events_rx)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.ice_servers
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn tracks(&self) -> &TrackCoordinator {
        &self.tracks
    }

    fn emit(&self, event: ParticipantEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for participant events");
        }
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| Error::SignalingError("signalling channel closed".to_string()))
    }

    pub async fn join(&mut self, room: impl Into<RoomId>) -> Result<()> {
        let room = room.into();
        if room.is_empty() {
            return Err(Error::SignalingError("room id must not be empty".to_string()));
        }
        if self.room.as_deref() == Some(room.as_str()) {
            return Ok(());
        }
        self.membership_requested = true;
        if self.room.is_some() {
            self.leave().await?;
        }
        self.send(ClientMessage::Join { room: room.clone() })?;
        info!("Joining room {}", room);
        self.room = Some(room);
        Ok(())
    }

    pub async fn leave(&mut self) -> Result<()> {
        self.membership_requested = true;
        let Some(room) = self.room.take() else {
            return Ok(());
        };
        // abandons any exchange still in flight
        self.registry.close_all().await;
        info!("Left room {}", room);
        self.send(ClientMessage::Leave { room })
    }

    pub async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome {
                client_id,
                ice_servers,
            } => {
                info!("Connected as {}", client_id);
                self.client_id = Some(client_id.clone());
                self.ice_servers = ice_servers.clone();
                self.emit(ParticipantEvent::Welcomed {
                    client_id,
                    ice_servers,
                });
            }
            ServerMessage::RoomMembers { room, members } => {
                // joined by the hub on connect, through `/ws/:room_id`
                if self.room.is_none() && !self.membership_requested {
                    info!("Joined room {} on connect", room);
                    self.room = Some(room.clone());
                }
                if !self.in_room(&room) {
                    debug!("Ignoring member list for room {}", room);
                    return;
                }
                let tracks = self.tracks.local_tracks();
                for member in &members {
                    if self.is_self(member) {
                        continue;
                    }
                    if let Err(e) = self
                        .registry
                        .create_session(member, Role::Responder, &tracks)
                        .await
                    {
                        warn!("Failed to prepare session for {}: {}", member, e);
                    }
                }
                self.emit(ParticipantEvent::Joined { room, members });
            }
            ServerMessage::PeerJoined { room, peer_id } => {
                if !self.in_room(&room) || self.is_self(&peer_id) {
                    return;
                }
                let tracks = self.tracks.local_tracks();
                match self
                    .registry
                    .create_session(&peer_id, Role::Initiator, &tracks)
                    .await
                {
                    Ok(_) => self.registry.open(&peer_id).await,
                    Err(e) => warn!("Failed to create session for {}: {}", peer_id, e),
                }
                self.emit(ParticipantEvent::PeerJoined(peer_id));
            }
            ServerMessage::PeerLeft { room, peer_id } => {
                if !self.in_room(&room) {
                    return;
                }
                self.registry.remove(&peer_id).await;
                self.emit(ParticipantEvent::PeerLeft(peer_id));
            }
            ServerMessage::Offer { from, description } => {
                self.relayed(from, SignalKind::Offer, description).await;
            }
            ServerMessage::Answer { from, description } => {
                self.relayed(from, SignalKind::Answer, description).await;
            }
            ServerMessage::IceCandidate { from, candidate } => {
                self.relayed(from, SignalKind::IceCandidate, candidate).await;
            }
            ServerMessage::Error { message } => {
                warn!("Hub error: {}", message);
                self.emit(ParticipantEvent::HubError(message));
            }
        }
        self.report_closed();
    }

    async fn relayed(&mut self, from: ClientId, kind: SignalKind, payload: serde_json::Value) {
        if self.room.is_none() {
            debug!("Not in a room, dropping {} from {}", kind.as_str(), from);
            return;
        }
        let tracks = self.tracks.local_tracks();
        if let Err(e) = self
            .registry
            .handle_signal(&from, kind, payload, &tracks)
            .await
        {
            warn!("Failed to handle {} from {}: {}", kind.as_str(), from, e);
        }
    }

    pub async fn handle_connection_event(&mut self, tagged: TaggedEvent) {
        let TaggedEvent {
            peer_id: peer,
            connection_id,
            event,
        } = tagged;
        if !self.registry.is_current(&peer, connection_id) {
            debug!("Ignoring event from a closed connection to {}", peer);
            return;
        }
        match event {
            ConnectionEvent::RemoteTrack(track) => {
                self.emit(ParticipantEvent::RemoteTrack { peer, track });
            }
            ConnectionEvent::RemoteTrackRemoved(track_id) => {
                self.emit(ParticipantEvent::RemoteTrackRemoved { peer, track_id });
            }
            other => {
                self.registry
                    .handle_connection_event(&peer, connection_id, other)
                    .await;
                self.report_closed();
            }
        }
    }

    /// Handle every connection event queued so far without waiting
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(tagged) = self.connection_events.try_recv() {
            self.handle_connection_event(tagged).await;
            handled += 1;
        }
        handled
    }

    pub async fn start_camera(&mut self, source: &dyn MediaSource) -> Result<()> {
        let result = self.tracks.start_camera(&mut self.registry, source).await;
        self.after_media(TrackPurpose::Camera, result)
    }

    pub async fn stop_camera(&mut self) -> bool {
        let stopped = self
            .tracks
            .detach_local_track(&mut self.registry, TrackPurpose::Camera)
            .await;
        self.report_closed();
        stopped
    }

    pub async fn start_microphone(&mut self, source: &dyn MediaSource) -> Result<()> {
        let result = self.tracks.start_microphone(&mut self.registry, source).await;
        self.after_media(TrackPurpose::Microphone, result)
    }

    pub async fn stop_microphone(&mut self) -> bool {
        let stopped = self
            .tracks
            .detach_local_track(&mut self.registry, TrackPurpose::Microphone)
            .await;
        self.report_closed();
        stopped
    }

    pub async fn start_screen_share(&mut self, source: &dyn MediaSource) -> Result<()> {
        let result = self
            .tracks
            .start_screen_share(&mut self.registry, source)
            .await;
        self.after_media(TrackPurpose::Screen, result)
    }

    pub async fn stop_screen_share(&mut self) -> bool {
        let stopped = self.tracks.stop_screen_share(&mut self.registry).await;
        self.report_closed();
        stopped
    }

    pub fn set_microphone_muted(&self, muted: bool) -> bool {
        self.tracks.set_microphone_muted(muted)
    }

    pub async fn set_target_bitrate(&mut self, purpose: TrackPurpose, kbps: u32) {
        self.tracks
            .set_target_bitrate(&mut self.registry, purpose, kbps)
            .await;
    }

    pub async fn track_ended(&mut self, track_id: &str) -> bool {
        let handled = self.tracks.track_ended(&mut self.registry, track_id).await;
        self.report_closed();
        handled
    }

    fn after_media(&mut self, purpose: TrackPurpose, result: Result<()>) -> Result<()> {
        self.report_closed();
        if let Err(e) = &result {
            warn!("Failed to start {}: {}", purpose, e);
            self.emit(ParticipantEvent::MediaFailed {
                purpose,
                reason: e.to_string(),
            });
        }
        result
    }

    fn report_closed(&mut self) {
        for peer in self.registry.take_closed() {
            self.emit(ParticipantEvent::SessionClosed(peer));
        }
    }

    pub async fn execute(&mut self, command: Command) {
        let result = match command {
            Command::Join(room) => self.join(room).await,
            Command::Leave => self.leave().await,
            Command::StartCamera(source) => self.start_camera(source.as_ref()).await,
            Command::StopCamera => {
                self.stop_camera().await;
                Ok(())
            }
            Command::StartMicrophone(source) => self.start_microphone(source.as_ref()).await,
            Command::StopMicrophone => {
                self.stop_microphone().await;
                Ok(())
            }
            Command::StartScreenShare(source) => self.start_screen_share(source.as_ref()).await,
            Command::StopScreenShare => {
                self.stop_screen_share().await;
                Ok(())
            }
            Command::SetMicrophoneMuted(muted) => {
                self.set_microphone_muted(muted);
                Ok(())
            }
            Command::SetTargetBitrate(purpose, kbps) => {
                self.set_target_bitrate(purpose, kbps).await;
                Ok(())
            }
            Command::TrackEnded(track_id) => {
                self.track_ended(&track_id).await;
                Ok(())
            }
        };
        if let Err(e) = result {
            // media failures were already reported
            if !e.is_media_error() {
                warn!("Command failed: {}", e);
            }
        }
    }

    /// Drive the participant until the hub connection closes
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<ServerMessage>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => self.handle_server_message(message).await,
                    None => {
                        info!("Signalling connection closed");
                        break;
                    }
                },
                Some(command) = commands.recv() => self.execute(command).await,
                Some(tagged) = self.connection_events.recv() => {
                    self.handle_connection_event(tagged).await;
                }
            }
        }
        self.registry.close_all().await;
    }

    fn in_room(&self, room: &str) -> bool {
        self.room.as_deref() == Some(room)
    }

    fn is_self(&self, peer: &str) -> bool {
        self.client_id.as_deref() == Some(peer)
    }
}
