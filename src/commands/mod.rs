pub mod session_api;
pub mod util_api;

pub use session_api::{AlwaysGranted, HostOutcome, PermissionGate, SessionHost};
