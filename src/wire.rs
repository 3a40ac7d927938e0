//! Relay message contract.
//!
//! The relay carries JSON text frames shaped `{"event": ..., "data": ...}`.
//! Outbound and inbound shapes differ for the same event name (the relay
//! rewrites `callUser` before forwarding it to the callee), so the two
//! directions get separate enums.

use crate::identity::EndpointId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque session-description or connectivity-candidate data.
///
/// Produced by one peer session, forwarded verbatim by the relay, consumed
/// by the remote peer session. The call state machine only routes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalEnvelope(pub serde_json::Value);

impl SignalEnvelope {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Messages sent from an endpoint to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "callUser", rename_all = "camelCase")]
    CallUser {
        user_to_call: EndpointId,
        signal_data: SignalEnvelope,
        from: EndpointId,
        name: String,
    },
    #[serde(rename = "answerCall")]
    AnswerCall {
        signal: SignalEnvelope,
        to: EndpointId,
    },
    #[serde(rename = "endCall")]
    EndCall { to: EndpointId },
}

/// Messages delivered from the relay to an endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "me")]
    Me { identity: EndpointId },
    #[serde(rename = "callUser")]
    CallUser {
        from: EndpointId,
        name: String,
        signal: SignalEnvelope,
    },
    #[serde(rename = "callAccepted")]
    CallAccepted { signal: SignalEnvelope },
    #[serde(rename = "callEnded")]
    CallEnded { from: EndpointId },
    /// Event names this client does not know. Logged and dropped by the
    /// dispatch loop rather than failing the whole frame.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed relay frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn encode(msg: &ClientMessage) -> Result<String, WireError> {
    Ok(serde_json::to_string(msg)?)
}

pub fn decode(text: &str) -> Result<ServerMessage, WireError> {
    Ok(serde_json::from_str(text)?)
}
