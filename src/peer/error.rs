//! Peer session error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("webrtc error: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("malformed signal envelope: {0}")]
    MalformedSignal(#[from] serde_json::Error),

    #[error("no local description after gathering")]
    NoLocalDescription,

    #[error("peer session already terminated")]
    Terminated,
}
