//! Media session handle
//!
//! The media transport itself is an external capability. This module pins
//! down the surface the session manager drives, and ships an implementation
//! on top of the `webrtc` crate in [`connection`].

pub mod connection;
pub mod ice;
pub mod types;

use crate::error::MediaError;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use connection::{RtcMediaEngine, RtcMediaSession};
pub use ice::{analyze_candidates, CandidateSummary, PendingCandidates};
pub use types::{
    ConnectionState, IceCandidate, LocalTrack, SdpType, ServerConfig, SessionDescription,
    TrackKind,
};

/// Events emitted by a media session. The receiver is handed out once by
/// [`MediaEngine::create`]; the session keeps no reference to its observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    LocalCandidateGenerated(IceCandidate),
    ConnectionStateChanged(ConnectionState),
}

pub type MediaEvents = mpsc::UnboundedReceiver<MediaEvent>;

/// Factory for media sessions.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[ServerConfig],
    ) -> Result<(Box<dyn MediaSession>, MediaEvents), MediaError>;
}

/// One negotiated media session.
#[async_trait]
pub trait MediaSession: Send + Sync {
    async fn create_local_audio_track(&self, track_id: &str) -> Result<LocalTrack, MediaError>;

    async fn add_track(&self, track: &LocalTrack, stream_labels: &[String])
        -> Result<(), MediaError>;

    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_local_description(&self, description: SessionDescription)
        -> Result<(), MediaError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    /// Candidate errors are non-fatal; callers log and move on.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    async fn close(&self);
}
