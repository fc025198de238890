//! Shape of the session document and its candidate sub-collections.
//!
//! ```text
//! <collection>/<session_id>
//!     offer:  {type: "offer",  sdp}
//!     answer: {type: "answer", sdp}
//!     status: waiting | connected | disconnected
//!     callerCandidates/<id>: {candidate, sdpMid, sdpMLineIndex}
//!     calleeCandidates/<id>: {candidate, sdpMid, sdpMLineIndex}
//! ```

use crate::peer::types::{IceCandidate, SdpType, SessionDescription};
use crate::signaling::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const OFFER: &str = "offer";
pub const ANSWER: &str = "answer";
pub const STATUS: &str = "status";

/// Written by the device.
pub const CALLER_CANDIDATES: &str = "callerCandidates";
/// Written by the viewer.
pub const CALLEE_CANDIDATES: &str = "calleeCandidates";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Connected,
    Disconnected,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
        }
    }

    pub fn to_value(self) -> Value {
        Value::String(self.as_str().to_string())
    }
}

/// Fields of a freshly published attempt: `{offer, status: waiting}`.
pub fn offer_fields(offer: &SessionDescription) -> Fields {
    let mut fields = Fields::new();
    fields.insert(OFFER.into(), description_value(offer));
    fields.insert(STATUS.into(), SessionStatus::Waiting.to_value());
    fields
}

pub fn description_value(description: &SessionDescription) -> Value {
    serde_json::json!({
        "type": description.kind,
        "sdp": description.sdp,
    })
}

/// The viewer's answer, if present and complete. Anything else is ignored.
pub fn parse_answer(fields: &Fields) -> Option<SessionDescription> {
    let raw = fields.get(ANSWER)?;
    let description: SessionDescription = serde_json::from_value(raw.clone()).ok()?;
    if description.kind != SdpType::Answer || description.sdp.is_empty() {
        return None;
    }
    Some(description)
}

/// Unknown status strings read as absent.
pub fn parse_status(fields: &Fields) -> Option<SessionStatus> {
    serde_json::from_value(fields.get(STATUS)?.clone()).ok()
}

pub fn candidate_fields(candidate: &IceCandidate) -> Fields {
    match serde_json::to_value(candidate) {
        Ok(Value::Object(map)) => map,
        _ => Fields::new(),
    }
}

/// `None` when any of the three fields is missing or mistyped.
pub fn parse_candidate(fields: &Fields) -> Option<IceCandidate> {
    serde_json::from_value(Value::Object(fields.clone())).ok()
}
