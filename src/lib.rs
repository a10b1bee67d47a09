//! WolfConf: signalling hub and connection negotiation for mesh video calls.

pub mod app_state;
pub mod config;
pub mod error;
pub mod hub;
pub mod peer;
pub mod room;
pub mod server;
pub mod signal;

pub use app_state::AppState;
pub use config::{Config, ParticipantConfig};
pub use error::{Error, Result};
pub use hub::Hub;
pub use server::build_router;
