use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::hub::Hub;

/// State shared by every WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RwLock<Hub>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let hub = Hub::new(config.ice_servers.clone());
        Self {
            hub: Arc::new(RwLock::new(hub)),
            config: Arc::new(config),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
