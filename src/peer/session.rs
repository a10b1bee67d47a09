//! One negotiation state machine plus the connection primitive it drives.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::connection::{PeerConnection, SenderId};
use super::negotiation::{
    negotiate, Effect, NegotiationEvent, NegotiationState, Outbound, Role, SessionView,
};
use super::tracks::{LocalTrack, TrackBinding, TrackPurpose, TrackSlot};
use crate::signal::{ClientId, IceCandidate};
use crate::Result;

pub struct PeerSession {
    remote_id: ClientId,
    connection_id: u64,
    role: Role,
    state: NegotiationState,
    remote_description_applied: bool,
    /// Remote candidates that arrived before any remote description
    pending_candidates: Vec<IceCandidate>,
    renegotiation_queued: bool,
    bindings: HashMap<TrackSlot, TrackBinding>,
    connection: Box<dyn PeerConnection>,
}

impl PeerSession {
    pub fn new(
        remote_id: impl Into<ClientId>,
        connection_id: u64,
        role: Role,
        connection: Box<dyn PeerConnection>,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            connection_id,
            role,
            state: NegotiationState::Idle,
            remote_description_applied: false,
            pending_candidates: Vec::new(),
            renegotiation_queued: false,
            bindings: HashMap::new(),
            connection,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == NegotiationState::Closed
    }

    pub fn pending_candidates(&self) -> &[IceCandidate] {
        &self.pending_candidates
    }

    pub fn binding(&self, slot: TrackSlot) -> Option<&TrackBinding> {
        self.bindings.get(&slot)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &TrackBinding> {
        self.bindings.values()
    }

    fn view(&self) -> SessionView {
        SessionView {
            role: self.role,
            state: self.state,
            remote_description_applied: self.remote_description_applied,
        }
    }

    /// Run `event` and every follow-up it causes to completion, returning
    /// the messages to relay to the remote peer in order.
    pub async fn handle(&mut self, event: NegotiationEvent) -> Vec<Outbound> {
        let mut outbound = Vec::new();
        let mut next = Some(event);

        while let Some(event) = next.take() {
            let transition = negotiate(self.view(), event);
            if transition.next != self.state {
                debug!(
                    "Session {} ({:?}): {} -> {}",
                    self.remote_id, self.role, self.state, transition.next
                );
            }
            self.state = transition.next;
            outbound.extend(transition.outbound);

            if let Some(effect) = transition.effect {
                next = match self.apply(effect).await {
                    Ok(follow_up) => follow_up,
                    Err(e) => {
                        warn!("Session {} failed: {}", self.remote_id, e);
                        Some(NegotiationEvent::Failed(e.to_string()))
                    }
                };
            }

            if next.is_none()
                && self.renegotiation_queued
                && self.state == NegotiationState::Stable
            {
                self.renegotiation_queued = false;
                next = Some(NegotiationEvent::NeedsRenegotiation);
            }
        }

        outbound
    }

    async fn apply(&mut self, effect: Effect) -> Result<Option<NegotiationEvent>> {
        match effect {
            Effect::CreateOffer => {
                let offer = self.connection.create_offer().await?;
                Ok(Some(NegotiationEvent::LocalOfferReady(offer)))
            }
            Effect::AcceptOffer {
                description,
                rollback,
            } => {
                if rollback {
                    debug!("Session {}: glare, rolling back local offer", self.remote_id);
                    self.connection.rollback().await?;
                    // our change still has to reach the remote side
                    self.renegotiation_queued = true;
                }
                self.connection.set_remote_description(&description).await?;
                self.remote_description_applied = true;
                self.flush_candidates().await?;
                let answer = self.connection.create_answer().await?;
                Ok(Some(NegotiationEvent::LocalAnswerReady(answer)))
            }
            Effect::ApplyAnswer(description) => {
                self.connection.set_remote_description(&description).await?;
                self.remote_description_applied = true;
                self.flush_candidates().await?;
                Ok(None)
            }
            Effect::AddCandidate(candidate) => {
                self.connection.add_ice_candidate(&candidate).await?;
                Ok(None)
            }
            Effect::BufferCandidate(candidate) => {
                self.pending_candidates.push(candidate);
                Ok(None)
            }
            Effect::QueueRenegotiation => {
                self.renegotiation_queued = true;
                Ok(None)
            }
            Effect::Release => {
                self.release().await;
                Ok(None)
            }
        }
    }

    async fn flush_candidates(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            debug!(
                "Session {}: applying {} buffered candidates",
                self.remote_id,
                pending.len()
            );
        }
        for candidate in pending {
            self.connection.add_ice_candidate(&candidate).await?;
        }
        Ok(())
    }

    pub async fn close(&mut self) {
        self.handle(NegotiationEvent::Close).await;
    }

    async fn release(&mut self) {
        self.connection.close().await;
        self.bindings.clear();
        self.pending_candidates.clear();
        self.renegotiation_queued = false;
    }

    /// Bind a track before the first exchange; no negotiation is triggered
    pub(crate) async fn add_initial_track(
        &mut self,
        track: &LocalTrack,
        bitrate: Option<u32>,
    ) -> Result<()> {
        let sender = self.connection.add_track(track).await?;
        if let Some(kbps) = bitrate {
            self.apply_bitrate(sender, kbps).await;
        }
        self.bindings.insert(
            track.purpose().slot(),
            TrackBinding {
                track: track.clone(),
                sender,
                target_bitrate_kbps: bitrate,
            },
        );
        Ok(())
    }

    pub async fn attach_track(
        &mut self,
        track: &LocalTrack,
        bitrate: Option<u32>,
    ) -> Vec<Outbound> {
        if self.is_closed() {
            return Vec::new();
        }
        let slot = track.purpose().slot();
        // occupied slot: swap in place, the remote side sees no change
        if let Some(sender) = self.bindings.get(&slot).map(|b| b.sender) {
            if let Err(e) = self.connection.replace_track(sender, track).await {
                warn!("Session {}: replace track failed: {}", self.remote_id, e);
                return self.handle(NegotiationEvent::Failed(e.to_string())).await;
            }
            if let Some(binding) = self.bindings.get_mut(&slot) {
                binding.track = track.clone();
            }
            debug!(
                "Session {}: replaced {:?} track with {}",
                self.remote_id,
                slot,
                track.purpose()
            );
            return Vec::new();
        }

        if let Err(e) = self.add_initial_track(track, bitrate).await {
            warn!("Session {}: add track failed: {}", self.remote_id, e);
            return self.handle(NegotiationEvent::Failed(e.to_string())).await;
        }
        self.handle(NegotiationEvent::NeedsRenegotiation).await
    }

    pub async fn detach_track(&mut self, purpose: TrackPurpose) -> Vec<Outbound> {
        let slot = purpose.slot();
        let Some(binding) = self
            .bindings
            .get(&slot)
            .filter(|b| b.purpose() == purpose)
            .cloned()
        else {
            return Vec::new();
        };
        self.bindings.remove(&slot);
        if let Err(e) = self.connection.remove_track(binding.sender).await {
            warn!("Session {}: remove track failed: {}", self.remote_id, e);
            return self.handle(NegotiationEvent::Failed(e.to_string())).await;
        }
        self.handle(NegotiationEvent::NeedsRenegotiation).await
    }

    pub async fn set_target_bitrate(&mut self, purpose: TrackPurpose, kbps: u32) {
        let sender = match self.bindings.get_mut(&purpose.slot()) {
            Some(binding) if binding.purpose() == purpose => {
                binding.target_bitrate_kbps = Some(kbps);
                binding.sender
            }
            _ => return,
        };
        self.apply_bitrate(sender, kbps).await;
    }

    async fn apply_bitrate(&self, sender: SenderId, kbps: u32) {
        if let Err(e) = self.connection.set_max_bitrate(sender, kbps).await {
            debug!(
                "Session {}: bitrate {} kbps not applied: {}",
                self.remote_id, kbps, e
            );
        }
    }
}
