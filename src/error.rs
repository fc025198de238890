use thiserror::Error;

/// Failures of the remote document store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by the media transport capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("media engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("offer creation failed: {0}")]
    OfferCreationFailed(String),

    #[error("session description rejected: {0}")]
    DescriptionRejected(String),

    #[error("ICE candidate rejected: {0}")]
    CandidateRejected(String),

    #[error("local track failed: {0}")]
    TrackFailed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no signed-in identity")]
    NoIdentity,

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("session already closed")]
    Closed,
}

/// The two categories the host sees.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<SessionError> for HostError {
    fn from(err: SessionError) -> Self {
        HostError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid ICE server: {0}")]
    InvalidIceServer(String),
}
