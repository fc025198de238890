use crate::commands::session_api::SessionHost;
use crate::config::validate_ice_servers;
use crate::error::HostError;
use crate::peer::types::{ConnectionState, ServerConfig};
use crate::session::SessionPhase;
use tracing::{info, warn};

impl SessionHost {
    /// Sets custom ICE servers for the next attempt
    pub async fn set_ice_servers(&self, servers: Vec<ServerConfig>) -> Result<(), HostError> {
        info!("Setting {} custom ICE servers", servers.len());
        if let Err(e) = validate_ice_servers(&servers) {
            warn!("{e}");
            return Err(HostError::Unavailable(e.to_string()));
        }
        *self.ice_servers.write().await = servers;
        Ok(())
    }

    /// Current ICE servers; the configured defaults unless overridden
    pub async fn get_ice_servers(&self) -> Vec<ServerConfig> {
        self.ice_servers.read().await.clone()
    }

    pub async fn reset_ice_servers(&self) {
        *self.ice_servers.write().await = self.config.ice_servers.clone();
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state
            .lock()
            .await
            .active
            .as_ref()
            .map(|h| h.phase())
            .unwrap_or(SessionPhase::Idle)
    }

    pub async fn is_connected(&self) -> bool {
        self.phase().await == SessionPhase::Connected
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state
            .lock()
            .await
            .active
            .as_ref()
            .map(|h| h.connection_state())
            .unwrap_or_default()
    }
}
