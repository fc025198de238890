pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

pub use commands::{HostOutcome, PermissionGate, SessionHost};
pub use config::Config;
pub use error::{HostError, MediaError, SessionError, StoreError};
pub use peer::{MediaEngine, MediaSession, RtcMediaEngine};
pub use session::{SessionHandle, SessionManager, SessionPhase};
pub use signaling::{MemoryStore, SignalingChannel};

/// Binary entry point: one session against the in-process store until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    logger::init(&config.logging);

    let host = SessionHost::new(
        Arc::new(config),
        Arc::new(MemoryStore::new()),
        Arc::new(RtcMediaEngine::new()),
    );

    host.start_session(cli.identity.as_deref()).await?;
    warn!("Loopback mode: signaling stays in this process, no remote viewer can answer");
    info!("Streaming, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    host.stop_session().await?;
    Ok(())
}
