//! Error types for the signalling hub and the client-side negotiation core

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signalling protocol or relay error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// No client or session is known under this id
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Camera, screen or microphone could not be acquired
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Local track misuse (wrong kind for its purpose, stopped track, ...)
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Session description could not be created or applied
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Remote ICE candidate could not be applied
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// The underlying peer connection primitive failed
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Transport-level failures that a fresh attempt may fix
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_) | Error::WebSocketError(_) | Error::IoError(_)
        )
    }

    /// Failures that must close the affected peer session
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::PeerConnectionError(_)
                | Error::SerializationError(_)
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    pub fn is_media_error(&self) -> bool {
        matches!(self, Error::MediaAcquisition(_) | Error::MediaTrackError(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
