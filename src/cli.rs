use clap::Parser;
use std::path::PathBuf;

/// Streams the microphone to a remote viewer, signaling through a shared
/// document store (loopback demo: in-process store, no remote viewer).
///
/// This binary runs the session against an in-process store. The offer and
/// the local candidates are published and logged, but no remote viewer can
/// answer. Real deployments embed `SessionHost` with a shared
/// `SignalingChannel` implementation.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// Signed-in identity; also the session id
    #[arg(short, long, env = "MICSTREAM_IDENTITY")]
    pub identity: Option<String>,

    /// TOML config file
    #[arg(short, long, env = "MICSTREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides `logging.level` from the config
    #[arg(long)]
    pub log_level: Option<String>,
}
