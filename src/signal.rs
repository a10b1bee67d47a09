//! Wire format of the message channel between clients and the hub.
//!
//! Every frame is a JSON object tagged by `"type"`. Session descriptions and
//! ICE candidates travel as opaque JSON: the hub relays them untouched and
//! only the receiving peer session gives them a type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

pub type ClientId = String;
pub type RoomId = String;

/// Frames sent by a client to the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join {
        room: RoomId,
    },
    Leave {
        room: RoomId,
    },
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<RoomId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ClientId>,
        description: Value,
    },
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<RoomId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ClientId>,
        description: Value,
    },
    IceCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<RoomId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ClientId>,
        candidate: Value,
    },
}

/// Frames sent by the hub to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Welcome {
        client_id: ClientId,
        #[serde(default)]
        ice_servers: Vec<String>,
    },
    RoomMembers {
        room: RoomId,
        members: Vec<ClientId>,
    },
    #[serde(rename_all = "camelCase")]
    PeerJoined { room: RoomId, peer_id: ClientId },
    #[serde(rename_all = "camelCase")]
    PeerLeft { room: RoomId, peer_id: ClientId },
    Offer {
        from: ClientId,
        description: Value,
    },
    Answer {
        from: ClientId,
        description: Value,
    },
    IceCandidate {
        from: ClientId,
        candidate: Value,
    },
    Error {
        message: String,
    },
}

/// The three relayed message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }

    /// Wrap a relayed payload with the sender identity injected by the hub
    pub fn into_message(self, from: ClientId, payload: Value) -> ServerMessage {
        match self {
            SignalKind::Offer => ServerMessage::Offer {
                from,
                description: payload,
            },
            SignalKind::Answer => ServerMessage::Answer {
                from,
                description: payload,
            },
            SignalKind::IceCandidate => ServerMessage::IceCandidate {
                from,
                candidate: payload,
            },
        }
    }
}

/// Where the hub should deliver a relayed payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Every other member of the sender's room. A named room must be the
    /// sender's own room.
    Broadcast { room: Option<RoomId> },
    /// A single client sharing the sender's room
    Target(ClientId),
}

impl ClientMessage {
    /// Split a relay frame into its kind, route and opaque payload.
    /// Returns `None` for membership frames.
    pub fn into_relay(self) -> Option<(SignalKind, Route, Value)> {
        let (kind, room, target, payload) = match self {
            ClientMessage::Join { .. } | ClientMessage::Leave { .. } => return None,
            ClientMessage::Offer {
                room,
                target,
                description,
            } => (SignalKind::Offer, room, target, description),
            ClientMessage::Answer {
                room,
                target,
                description,
            } => (SignalKind::Answer, room, target, description),
            ClientMessage::IceCandidate {
                room,
                target,
                candidate,
            } => (SignalKind::IceCandidate, room, target, candidate),
        };
        let route = match target {
            Some(target) => Route::Target(target),
            None => Route::Broadcast { room },
        };
        Some((kind, route, payload))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::SerializationError(format!("invalid client frame: {}", e)))
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::SerializationError(format!("invalid server frame: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description as exchanged during offer/answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn to_payload(&self) -> Value {
        serde_json::json!({ "type": self.kind, "sdp": self.sdp })
    }

    /// Type a relayed payload, checking it carries the expected description type
    pub fn from_payload(payload: Value, expected: SdpType) -> Result<Self> {
        let description: SessionDescription = serde_json::from_value(payload)
            .map_err(|e| Error::SdpError(format!("malformed session description: {}", e)))?;
        if description.kind != expected {
            return Err(Error::SdpError(format!(
                "expected {:?} description, got {:?}",
                expected, description.kind
            )));
        }
        if description.sdp.is_empty() {
            return Err(Error::SdpError("empty session description".to_string()));
        }
        Ok(description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }

    pub fn to_payload(&self) -> Value {
        // serializing a plain struct of strings cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_payload(payload: Value) -> Result<Self> {
        serde_json::from_value(payload)
            .map_err(|e| Error::IceCandidateError(format!("malformed candidate: {}", e)))
    }
}
