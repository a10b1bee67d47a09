//! All peer sessions of one participant, keyed by remote client id.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{ConnectionEvent, ConnectionEvents, ConnectionFactory, EventSender};
use super::negotiation::{NegotiationEvent, Outbound, Role};
use super::session::PeerSession;
use super::tracks::{LocalTrack, TrackPurpose};
use crate::signal::{
    ClientId, ClientMessage, IceCandidate, SdpType, SessionDescription, SignalKind,
};
use crate::{Error, Result};

pub struct PeerRegistry {
    sessions: HashMap<ClientId, PeerSession>,
    factory: Arc<dyn ConnectionFactory>,
    events_tx: EventSender,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    next_connection_id: u64,
    // failed and dropped, not yet reported
    closed: Vec<ClientId>,
}

impl PeerRegistry {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        events_tx: EventSender,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            factory,
            events_tx,
            outbound,
            next_connection_id: 1,
            closed: Vec::new(),
        }
    }

    pub fn session(&self, remote: &str) -> Option<&PeerSession> {
        self.sessions.get(remote)
    }

    pub fn contains(&self, remote: &str) -> bool {
        self.sessions.contains_key(remote)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn peers(&self) -> Vec<ClientId> {
        self.sessions.keys().cloned().collect()
    }

    /// False for connections of sessions already dropped
    pub fn is_current(&self, remote: &str, connection_id: u64) -> bool {
        self.sessions
            .get(remote)
            .is_some_and(|s| s.connection_id() == connection_id)
    }

    /// Returns `false` if a session for `remote` already exists
    pub async fn create_session(
        &mut self,
        remote: &str,
        role: Role,
        tracks: &[(LocalTrack, Option<u32>)],
    ) -> Result<bool> {
        if self.sessions.contains_key(remote) {
            return Ok(false);
        }
        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;
        let events =
            ConnectionEvents::new(remote.to_string(), connection_id, self.events_tx.clone());
        let connection = self.factory.create(remote, events)?;
        let mut session = PeerSession::new(remote, connection_id, role, connection);
        for (track, bitrate) in tracks {
            if let Err(e) = session.add_initial_track(track, *bitrate).await {
                session.close().await;
                return Err(e);
            }
        }
        info!("Created {:?} session for {}", role, remote);
        self.sessions.insert(remote.to_string(), session);
        Ok(true)
    }

    pub async fn open(&mut self, remote: &str) {
        self.drive(remote, NegotiationEvent::Open).await;
    }

    pub async fn handle_signal(
        &mut self,
        from: &str,
        kind: SignalKind,
        payload: Value,
        tracks: &[(LocalTrack, Option<u32>)],
    ) -> Result<()> {
        if !self.sessions.contains_key(from) {
            // only an offer opens a session
            if kind != SignalKind::Offer {
                debug!("Dropping {} from {}: no session", kind.as_str(), from);
                return Ok(());
            }
            self.create_session(from, Role::Responder, tracks).await?;
        }

        let event = match parse_signal(kind, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Bad {} from {}: {}", kind.as_str(), from, e);
                NegotiationEvent::Failed(e.to_string())
            }
        };
        self.drive(from, event).await;
        Ok(())
    }

    pub async fn handle_connection_event(
        &mut self,
        remote: &str,
        connection_id: u64,
        event: ConnectionEvent,
    ) {
        if !self.is_current(remote, connection_id) {
            debug!("Dropping event from stale connection {} to {}", connection_id, remote);
            return;
        }
        match event {
            ConnectionEvent::LocalCandidate(candidate) => {
                self.drive(remote, NegotiationEvent::LocalCandidate(candidate))
                    .await;
            }
            ConnectionEvent::Failed(reason) => {
                self.drive(remote, NegotiationEvent::Failed(reason)).await;
            }
            // surfaced by the participant, nothing to negotiate
            ConnectionEvent::RemoteTrack(_) | ConnectionEvent::RemoteTrackRemoved(_) => {}
        }
    }

    pub async fn remove(&mut self, remote: &str) -> bool {
        match self.sessions.remove(remote) {
            Some(mut session) => {
                session.close().await;
                info!("Closed session for {}", remote);
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&mut self) {
        for (remote, mut session) in self.sessions.drain() {
            session.close().await;
            debug!("Closed session for {}", remote);
        }
    }

    pub async fn attach_track(&mut self, track: &LocalTrack, bitrate: Option<u32>) {
        for (remote, session) in self.sessions.iter_mut() {
            let outbound = session.attach_track(track, bitrate).await;
            dispatch(&self.outbound, remote, outbound);
        }
        self.prune_closed();
    }

    pub async fn detach_track(&mut self, purpose: TrackPurpose) {
        for (remote, session) in self.sessions.iter_mut() {
            let outbound = session.detach_track(purpose).await;
            dispatch(&self.outbound, remote, outbound);
        }
        self.prune_closed();
    }

    pub async fn set_target_bitrate(&mut self, purpose: TrackPurpose, kbps: u32) {
        for session in self.sessions.values_mut() {
            session.set_target_bitrate(purpose, kbps).await;
        }
    }

    /// Peers whose sessions failed and were dropped since the last call
    pub fn take_closed(&mut self) -> Vec<ClientId> {
        std::mem::take(&mut self.closed)
    }

    fn prune_closed(&mut self) {
        let closed: Vec<ClientId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        for id in closed {
            self.sessions.remove(&id);
            info!("Dropped closed session for {}", id);
            self.closed.push(id);
        }
    }

    async fn drive(&mut self, remote: &str, event: NegotiationEvent) {
        let Some(session) = self.sessions.get_mut(remote) else {
            debug!("No session for {}, ignoring event", remote);
            return;
        };
        let outbound = session.handle(event).await;
        dispatch(&self.outbound, remote, outbound);
        if session.is_closed() {
            self.sessions.remove(remote);
            info!("Dropped closed session for {}", remote);
            self.closed.push(remote.to_string());
        }
    }
}

fn parse_signal(kind: SignalKind, payload: Value) -> Result<NegotiationEvent> {
    Ok(match kind {
        SignalKind::Offer => {
            let description = SessionDescription::from_payload(payload, SdpType::Offer)?;
            NegotiationEvent::RemoteOffer(description)
        }
        SignalKind::Answer => {
            let description = SessionDescription::from_payload(payload, SdpType::Answer)?;
            NegotiationEvent::RemoteAnswer(description)
        }
        SignalKind::IceCandidate => {
            NegotiationEvent::RemoteCandidate(IceCandidate::from_payload(payload)?)
        }
    })
}

fn dispatch(tx: &mpsc::UnboundedSender<ClientMessage>, remote: &str, outbound: Vec<Outbound>) {
    for message in outbound {
        let target = Some(remote.to_string());
        let frame = match message {
            Outbound::Offer(description) => ClientMessage::Offer {
                room: None,
                target,
                description: description.to_payload(),
            },
            Outbound::Answer(description) => ClientMessage::Answer {
                room: None,
                target,
                description: description.to_payload(),
            },
            Outbound::Candidate(candidate) => ClientMessage::IceCandidate {
                room: None,
                target,
                candidate: candidate.to_payload(),
            },
        };
        if tx.send(frame).is_err() {
            warn!(
                "{}",
                Error::SignalingError(format!("channel closed, message to {} lost", remote))
            );
        }
    }
}
