use crate::config::Config;
use crate::error::{HostError, SessionError};
use crate::peer::types::ServerConfig;
use crate::peer::MediaEngine;
use crate::session::{SessionHandle, SessionManager};
use crate::signaling::SignalingChannel;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Whether the platform granted audio capture.
pub trait PermissionGate: Send + Sync {
    fn audio_capture_granted(&self) -> bool;
}

/// For hosts without a permission model.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn audio_capture_granted(&self) -> bool {
        true
    }
}

/// Attempt-level outcome reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOutcome {
    Started,
    AlreadyRunning,
    Stopped,
}

#[derive(Default)]
pub(crate) struct HostState {
    pub active: Option<SessionHandle>,
    pub last_identity: Option<String>,
}

/// Control surface exposed to the host: start, stop, restart.
pub struct SessionHost {
    pub(crate) config: Arc<Config>,
    channel: Arc<dyn SignalingChannel>,
    engine: Arc<dyn MediaEngine>,
    permissions: Arc<dyn PermissionGate>,
    pub(crate) ice_servers: RwLock<Vec<ServerConfig>>,
    pub(crate) state: Mutex<HostState>,
}

impl SessionHost {
    pub fn new(
        config: Arc<Config>,
        channel: Arc<dyn SignalingChannel>,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        let ice_servers = RwLock::new(config.ice_servers.clone());
        Self {
            config,
            channel,
            engine,
            permissions: Arc::new(AlwaysGranted),
            ice_servers,
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionGate>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Starts streaming for `identity`. Calling it again for a running
    /// session with the same identity changes nothing.
    pub async fn start_session(&self, identity: Option<&str>) -> Result<HostOutcome, HostError> {
        if !self.permissions.audio_capture_granted() {
            warn!("Audio capture permission not granted");
            return Err(HostError::PermissionDenied(
                "audio capture permission not granted".into(),
            ));
        }

        let Some(identity) = identity.map(str::trim).filter(|id| !id.is_empty()) else {
            warn!("No user logged in");
            return Err(SessionError::NoIdentity.into());
        };

        let mut state = self.state.lock().await;
        if let Some(active) = &state.active {
            if active.session_id() == identity && active.phase().is_active() {
                return Ok(HostOutcome::AlreadyRunning);
            }
        }
        if let Some(previous) = state.active.take() {
            let _ = previous.stop().await;
        }

        let servers = self.ice_servers.read().await.clone();
        let manager = SessionManager::new(
            Arc::clone(&self.config),
            Arc::clone(&self.channel),
            Arc::clone(&self.engine),
        )
        .with_ice_servers(servers);

        let handle = manager.start(Some(identity)).await.map_err(|e| {
            warn!("Mic stream not started: {e}");
            HostError::from(e)
        })?;

        info!("Mic stream started for {}", handle.session_id());
        state.last_identity = Some(handle.session_id().to_string());
        state.active = Some(handle);
        Ok(HostOutcome::Started)
    }

    /// Stops streaming and releases everything. Safe to call repeatedly.
    pub async fn stop_session(&self) -> Result<HostOutcome, HostError> {
        let active = self.state.lock().await.active.take();
        if let Some(handle) = active {
            let id = handle.session_id().to_string();
            // An already-finished session has nothing left to tear down.
            let _ = handle.stop().await;
            info!("Mic stream stopped for {id}");
        }
        Ok(HostOutcome::Stopped)
    }

    /// Re-enters with the last identity, e.g. on a system restart signal.
    /// Leftover remote state is cleared by the fresh epoch.
    pub async fn restart_session(&self) -> Result<HostOutcome, HostError> {
        let identity = {
            let mut state = self.state.lock().await;
            let identity = state
                .last_identity
                .clone()
                .ok_or_else(|| HostError::Unavailable("no session to restart".into()))?;
            if let Some(previous) = state.active.take() {
                let _ = previous.stop().await;
            }
            identity
        };
        info!("Restart requested for {identity}");
        self.start_session(Some(&identity)).await
    }
}
