use serde::{Deserialize, Serialize};
use signaling::HubConfig;
use std::net::SocketAddr;
use storage::RelayConfig;

pub const DEFAULT_BIND: &str = "0.0.0.0:1869";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub hub: HubConfig,
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 1869)),
            hub: HubConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Copy safe to print or log.
    pub fn redacted(&self) -> Self {
        Self {
            relay: self.relay.redacted(),
            ..self.clone()
        }
    }
}
