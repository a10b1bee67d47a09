#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use wolfconf::peer::{
    ConnectionEvent, ConnectionEvents, ConnectionFactory, LocalTrack, MediaConstraints, MediaKind,
    MediaSource, MediaTrack, Participant, ParticipantEvent, PeerConnection, RemoteTrack, SenderId,
    TrackPurpose,
};
use wolfconf::signal::{ClientId, ClientMessage, IceCandidate, SessionDescription, ServerMessage};
use wolfconf::{Error, Hub, ParticipantConfig, Result};

/// Every call made on a fake connection, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateOffer(String),
    CreateAnswer(String),
    SetRemote(String),
    Rollback,
    AddCandidate(String),
    AddTrack(String),
    ReplaceTrack(u64, String),
    RemoveTrack(u64),
    SetMaxBitrate(u64, u32),
    Close,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Descriptions list the sent tracks as `+<kind>:<id>` tokens, e.g.
/// `offer A->B +video:A-camera-1 #2`, so the receiving fake can report them
pub struct FakeConnection {
    label: String,
    calls: CallLog,
    events: ConnectionEvents,
    counter: AtomicU64,
    bitrate_supported: bool,
    senders: Mutex<Vec<(u64, String, MediaKind)>>,
    remote_tracks: Mutex<Vec<String>>,
}

impl FakeConnection {
    pub fn new(label: &str, events: ConnectionEvents) -> (Self, CallLog) {
        let calls: CallLog = Arc::default();
        let conn = Self {
            label: label.to_string(),
            calls: calls.clone(),
            events,
            counter: AtomicU64::new(0),
            bitrate_supported: true,
            senders: Mutex::default(),
            remote_tracks: Mutex::default(),
        };
        (conn, calls)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn describe(&self, kind: &str) -> String {
        let tracks: String = self
            .senders
            .lock()
            .unwrap()
            .iter()
            .map(|(_, id, kind)| match kind {
                MediaKind::Audio => format!(" +audio:{}", id),
                MediaKind::Video => format!(" +video:{}", id),
            })
            .collect();
        format!("{} {}{} #{}", kind, self.label, tracks, self.next())
    }

    /// Report tracks that appeared in or vanished from the remote description
    fn surface_remote_tracks(&self, sdp: &str) {
        let listed: Vec<RemoteTrack> = sdp
            .split_whitespace()
            .filter_map(|token| token.strip_prefix('+')?.split_once(':'))
            .map(|(kind, id)| RemoteTrack {
                id: id.to_string(),
                kind: if kind == "audio" {
                    MediaKind::Audio
                } else {
                    MediaKind::Video
                },
            })
            .collect();
        let mut known = self.remote_tracks.lock().unwrap();
        for gone in known.iter().filter(|id| !listed.iter().any(|t| &t.id == *id)) {
            self.events.emit(ConnectionEvent::RemoteTrackRemoved(gone.clone()));
        }
        for track in &listed {
            if !known.contains(&track.id) {
                self.events.emit(ConnectionEvent::RemoteTrack(track.clone()));
            }
        }
        *known = listed.into_iter().map(|t| t.id).collect();
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let sdp = self.describe("offer");
        self.record(Call::CreateOffer(sdp.clone()));
        self.events.emit(ConnectionEvent::LocalCandidate(IceCandidate::new(format!(
            "cand {}",
            sdp
        ))));
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let sdp = self.describe("answer");
        self.record(Call::CreateAnswer(sdp.clone()));
        self.events.emit(ConnectionEvent::LocalCandidate(IceCandidate::new(format!(
            "cand {}",
            sdp
        ))));
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        if description.sdp.contains("malformed") {
            return Err(Error::SdpError("cannot parse description".to_string()));
        }
        self.record(Call::SetRemote(description.sdp.clone()));
        self.surface_remote_tracks(&description.sdp);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.record(Call::Rollback);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        if candidate.candidate.contains("bad") {
            return Err(Error::IceCandidateError("unusable candidate".to_string()));
        }
        self.record(Call::AddCandidate(candidate.candidate.clone()));
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId> {
        self.record(Call::AddTrack(track.id().to_string()));
        let sender = self.next();
        self.senders
            .lock()
            .unwrap()
            .push((sender, track.id().to_string(), track.kind()));
        Ok(SenderId(sender))
    }

    async fn replace_track(&self, sender: SenderId, track: &LocalTrack) -> Result<()> {
        self.record(Call::ReplaceTrack(sender.0, track.id().to_string()));
        Ok(())
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        self.record(Call::RemoveTrack(sender.0));
        self.senders.lock().unwrap().retain(|(s, _, _)| *s != sender.0);
        Ok(())
    }

    async fn set_max_bitrate(&self, sender: SenderId, kbps: u32) -> Result<()> {
        if !self.bitrate_supported {
            return Err(Error::PeerConnectionError("bitrate control unsupported".to_string()));
        }
        self.record(Call::SetMaxBitrate(sender.0, kbps));
        Ok(())
    }

    async fn close(&self) {
        self.record(Call::Close);
    }
}

/// Hands out fake connections and keeps their call logs by remote peer
#[derive(Default)]
pub struct FakeFactory {
    owner: String,
    logs: Mutex<HashMap<String, Vec<CallLog>>>,
    sinks: Mutex<HashMap<String, Vec<ConnectionEvents>>>,
    bitrate_unsupported: AtomicBool,
}

impl FakeFactory {
    pub fn new(owner: &str) -> Arc<Self> {
        Arc::new(Self {
            owner: owner.to_string(),
            ..Self::default()
        })
    }

    pub fn without_bitrate_control(owner: &str) -> Arc<Self> {
        let factory = Self::new(owner);
        factory.bitrate_unsupported.store(true, Ordering::SeqCst);
        factory
    }

    /// Calls on the most recent connection toward `peer`
    pub fn calls(&self, peer: &str) -> Vec<Call> {
        self.logs
            .lock()
            .unwrap()
            .get(peer)
            .and_then(|logs| logs.last())
            .map(|log| log.lock().unwrap().clone())
            .unwrap_or_default()
    }

    /// Event sink of the most recent connection toward `peer`
    pub fn events(&self, peer: &str) -> ConnectionEvents {
        self.sinks.lock().unwrap()[peer].last().cloned().unwrap()
    }

    pub fn connections(&self, peer: &str) -> usize {
        self.logs
            .lock()
            .unwrap()
            .get(peer)
            .map(|logs| logs.len())
            .unwrap_or(0)
    }
}

impl ConnectionFactory for FakeFactory {
    fn create(&self, peer_id: &str, events: ConnectionEvents) -> Result<Box<dyn PeerConnection>> {
        self.sinks
            .lock()
            .unwrap()
            .entry(peer_id.to_string())
            .or_default()
            .push(events.clone());
        let (mut conn, log) = FakeConnection::new(&format!("{}->{}", self.owner, peer_id), events);
        conn.bitrate_supported = !self.bitrate_unsupported.load(Ordering::SeqCst);
        self.logs
            .lock()
            .unwrap()
            .entry(peer_id.to_string())
            .or_default()
            .push(log);
        Ok(Box::new(conn))
    }
}

pub struct FakeTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn new(id: &str, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub fn local_track(id: &str, purpose: TrackPurpose) -> (LocalTrack, Arc<FakeTrack>) {
    let media = FakeTrack::new(id, purpose.kind());
    let track = LocalTrack::new(purpose, media.clone()).unwrap();
    (track, media)
}

/// Capture devices; tracks are named `<owner>-<purpose>-<n>`
#[derive(Default)]
pub struct FakeSource {
    owner: String,
    deny: AtomicBool,
    counter: AtomicU64,
    issued: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeSource {
    pub fn new(owner: &str) -> Arc<Self> {
        Arc::new(Self {
            owner: owner.to_string(),
            ..Self::default()
        })
    }

    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn issued(&self) -> Vec<Arc<FakeTrack>> {
        self.issued.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakeTrack> {
        self.issued.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn acquire(
        &self,
        purpose: TrackPurpose,
        _constraints: &MediaConstraints,
    ) -> Result<Arc<dyn MediaTrack>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(Error::MediaAcquisition(format!("{} permission denied", purpose)));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let track = FakeTrack::new(&format!("{}-{}-{}", self.owner, purpose, n), purpose.kind());
        self.issued.lock().unwrap().push(track.clone());
        Ok(track)
    }
}

pub struct Node {
    pub id: ClientId,
    pub participant: Participant,
    pub events: mpsc::UnboundedReceiver<ParticipantEvent>,
    pub factory: Arc<FakeFactory>,
    pub source: Arc<FakeSource>,
    inbox: mpsc::UnboundedReceiver<ServerMessage>,
    outbox: mpsc::UnboundedReceiver<ClientMessage>,
    /// Every frame this node sent to the hub
    pub sent: Vec<ClientMessage>,
}

impl Node {
    pub fn drain_events(&mut self) -> Vec<ParticipantEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn offers_sent_to(&self, peer: &str) -> usize {
        self.sent
            .iter()
            .filter(|m| matches!(m, ClientMessage::Offer { target: Some(t), .. } if t == peer))
            .count()
    }
}

/// Participants wired through an in-process hub
pub struct Mesh {
    pub hub: Hub,
    pub nodes: Vec<Node>,
}

impl Mesh {
    pub fn new() -> Self {
        Self {
            hub: Hub::new(vec!["stun:stun.example.org:3478".to_string()]),
            nodes: Vec::new(),
        }
    }

    pub fn add(&mut self, id: &str) -> usize {
        self.add_with_factory(id, FakeFactory::new(id))
    }

    pub fn add_with_factory(&mut self, id: &str, factory: Arc<FakeFactory>) -> usize {
        let (hub_tx, inbox) = mpsc::unbounded_channel();
        let (out_tx, outbox) = mpsc::unbounded_channel();
        let (participant, events) =
            Participant::new(ParticipantConfig::default(), factory.clone(), out_tx);
        self.hub.connect_with_id(id.to_string(), hub_tx);
        self.nodes.push(Node {
            id: id.to_string(),
            participant,
            events,
            factory,
            source: FakeSource::new(id),
            inbox,
            outbox,
            sent: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn node(&mut self, id: &str) -> &mut Node {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .unwrap_or_else(|| panic!("no node {}", id))
    }

    /// Forward everything `id` queued to the hub
    pub fn flush(&mut self, id: &str) -> usize {
        let Mesh { hub, nodes } = self;
        let node = nodes.iter_mut().find(|n| n.id == id).unwrap();
        let mut moved = 0;
        while let Ok(message) = node.outbox.try_recv() {
            node.sent.push(message.clone());
            if let Err(e) = hub.handle(&node.id, message) {
                hub.send(
                    &node.id,
                    ServerMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
            moved += 1;
        }
        moved
    }

    /// Hand the hub's frames for `id` to its participant
    pub async fn deliver(&mut self, id: &str) -> usize {
        let node = self.node(id);
        let mut moved = 0;
        while let Ok(message) = node.inbox.try_recv() {
            node.participant.handle_server_message(message).await;
            moved += 1;
        }
        moved += node.participant.process_pending_events().await;
        moved
    }

    /// Run until no frame or connection event is left anywhere
    pub async fn pump(&mut self) {
        let ids: Vec<String> = self.nodes.iter().map(|n| n.id.clone()).collect();
        loop {
            let mut moved = 0;
            for id in &ids {
                moved += self.deliver(id).await;
                moved += self.flush(id);
            }
            if moved == 0 {
                break;
            }
        }
    }

    pub async fn join(&mut self, id: &str, room: &str) {
        self.node(id).participant.join(room).await.unwrap();
        self.pump().await;
    }
}
