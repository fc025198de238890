//! Session lifecycle: the handshake state machine and its reconnect policy.

pub mod events;
pub mod manager;
pub mod reconnect;
pub mod state;

pub use events::SessionEvent;
pub use manager::{SessionHandle, SessionManager};
pub use reconnect::{ReconnectController, RestartCause};
pub use state::SessionPhase;
