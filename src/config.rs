//! Configuration for the hub server and for client participants.
//!
//! The server reads its settings from the environment, see [`Config::from_env`].

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::peer::TrackPurpose;
use crate::{Error, Result};

/// Hub server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served at `/`
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// STUN/TURN URLs advertised to clients in their `welcome` frame
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_static_dir() -> String {
    "public".to_string()
}

fn default_ice_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            ice_servers: default_ice_servers(),
        }
    }
}

impl Config {
    /// Load from `HOST`, `PORT`, `STATIC_DIR` and `ICE_SERVERS`
    /// (comma separated). Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            config.static_dir = dir;
        }
        if let Some(servers) = lookup("ICE_SERVERS") {
            config.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        config
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("bad bind address: {}", e)))
    }
}

/// Client-side settings for a [`crate::peer::Participant`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantConfig {
    /// Initial target bitrate for camera bindings, in kbps
    #[serde(default)]
    pub camera_bitrate_kbps: Option<u32>,

    #[serde(default)]
    pub screen_bitrate_kbps: Option<u32>,

    #[serde(default)]
    pub microphone_bitrate_kbps: Option<u32>,
}

impl ParticipantConfig {
    pub fn bitrate_for(&self, purpose: TrackPurpose) -> Option<u32> {
        match purpose {
            TrackPurpose::Camera => self.camera_bitrate_kbps,
            TrackPurpose::Screen => self.screen_bitrate_kbps,
            TrackPurpose::Microphone => self.microphone_bitrate_kbps,
        }
    }
}
