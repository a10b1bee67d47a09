//! Offer/answer sequencing as a pure transition function.
//!
//! [`negotiate`] maps a session's current view and one event to the next
//! state, at most one outbound message and at most one local effect. It
//! performs no I/O; [`super::session::PeerSession`] executes the effects
//! against the connection primitive and feeds the results back in.
//!
//! Glare is resolved by role: while an offer of its own is outstanding, the
//! initiator ignores incoming offers and the responder rolls its offer back
//! and answers.

use std::fmt;

use crate::signal::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    Idle,
    LocalOfferPending,
    AwaitingAnswer,
    RemoteOfferPending,
    Stable,
    Renegotiating,
    Closed,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::LocalOfferPending => "local-offer-pending",
            NegotiationState::AwaitingAnswer => "awaiting-answer",
            NegotiationState::RemoteOfferPending => "remote-offer-pending",
            NegotiationState::Stable => "stable",
            NegotiationState::Renegotiating => "renegotiating",
            NegotiationState::Closed => "closed",
        }
    }

    /// An offer of ours has been or is being produced and is not yet answered
    pub fn has_local_offer(&self) -> bool {
        matches!(
            self,
            NegotiationState::LocalOfferPending
                | NegotiationState::AwaitingAnswer
                | NegotiationState::Renegotiating
        )
    }

    /// An offer/answer exchange is under way in either direction
    pub fn is_negotiating(&self) -> bool {
        self.has_local_offer() || *self == NegotiationState::RemoteOfferPending
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the engine needs to know about a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionView {
    pub role: Role,
    pub state: NegotiationState,
    pub remote_description_applied: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationEvent {
    /// Start the first offer cycle
    Open,
    /// Attached tracks changed structurally
    NeedsRenegotiation,
    LocalOfferReady(SessionDescription),
    LocalAnswerReady(SessionDescription),
    RemoteOffer(SessionDescription),
    RemoteAnswer(SessionDescription),
    RemoteCandidate(IceCandidate),
    /// Gathered by the local connection primitive
    LocalCandidate(IceCandidate),
    Failed(String),
    Close,
}

/// Message to relay to the remote peer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

/// Local side effect for the session to execute
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create and apply a local offer, then report `LocalOfferReady`
    CreateOffer,
    /// Optionally roll back our own offer, apply the remote offer, flush
    /// buffered candidates, create and apply an answer, then report
    /// `LocalAnswerReady`
    AcceptOffer {
        description: SessionDescription,
        rollback: bool,
    },
    /// Apply the remote answer and flush buffered candidates
    ApplyAnswer(SessionDescription),
    AddCandidate(IceCandidate),
    BufferCandidate(IceCandidate),
    /// Replay `NeedsRenegotiation` once the session is stable again
    QueueRenegotiation,
    /// Close the primitive and drop bindings and buffered state
    Release,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: NegotiationState,
    pub outbound: Option<Outbound>,
    pub effect: Option<Effect>,
}

impl Transition {
    fn stay(state: NegotiationState) -> Self {
        Self {
            next: state,
            outbound: None,
            effect: None,
        }
    }

    fn to(next: NegotiationState) -> Self {
        Self::stay(next)
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }

    fn with_outbound(mut self, outbound: Outbound) -> Self {
        self.outbound = Some(outbound);
        self
    }
}

pub fn negotiate(view: SessionView, event: NegotiationEvent) -> Transition {
    use NegotiationEvent as E;
    use NegotiationState as S;

    let state = view.state;
    if state == S::Closed {
        return Transition::stay(S::Closed);
    }

    match event {
        E::Close | E::Failed(_) => Transition::to(S::Closed).with_effect(Effect::Release),

        E::Open => match (state, view.role) {
            (S::Idle, Role::Initiator) => {
                Transition::to(S::LocalOfferPending).with_effect(Effect::CreateOffer)
            }
            _ => Transition::stay(state),
        },

        E::NeedsRenegotiation => match state {
            S::Stable => Transition::to(S::Renegotiating).with_effect(Effect::CreateOffer),
            S::Idle => Transition::stay(state),
            _ => Transition::stay(state).with_effect(Effect::QueueRenegotiation),
        },

        E::LocalOfferReady(description) => {
            if matches!(state, S::LocalOfferPending | S::Renegotiating) {
                Transition::to(S::AwaitingAnswer).with_outbound(Outbound::Offer(description))
            } else {
                Transition::stay(state)
            }
        }

        E::LocalAnswerReady(description) => {
            if state == S::RemoteOfferPending {
                Transition::to(S::Stable).with_outbound(Outbound::Answer(description))
            } else {
                Transition::stay(state)
            }
        }

        E::RemoteOffer(description) => match state {
            S::Idle | S::Stable => {
                Transition::to(S::RemoteOfferPending).with_effect(Effect::AcceptOffer {
                    description,
                    rollback: false,
                })
            }
            s if s.has_local_offer() => match view.role {
                Role::Initiator => Transition::stay(state),
                Role::Responder => {
                    Transition::to(S::RemoteOfferPending).with_effect(Effect::AcceptOffer {
                        description,
                        rollback: true,
                    })
                }
            },
            _ => Transition::stay(state),
        },

        E::RemoteAnswer(description) => {
            if state == S::AwaitingAnswer {
                Transition::to(S::Stable).with_effect(Effect::ApplyAnswer(description))
            } else {
                Transition::stay(state)
            }
        }

        E::RemoteCandidate(candidate) => {
            if view.remote_description_applied {
                Transition::stay(state).with_effect(Effect::AddCandidate(candidate))
            } else {
                Transition::stay(state).with_effect(Effect::BufferCandidate(candidate))
            }
        }

        E::LocalCandidate(candidate) => {
            Transition::stay(state).with_outbound(Outbound::Candidate(candidate))
        }
    }
}
