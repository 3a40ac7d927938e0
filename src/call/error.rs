//! Call-related error types.

use crate::peer::PeerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    /// The local stream was never acquired or has been released. The
    /// attempted action changes no state.
    #[error("local media unavailable")]
    MediaUnavailable,

    #[error("not registered with the relay yet")]
    NotRegistered,

    #[error("a call is already in progress")]
    CallInProgress,

    #[error("no pending call to act on")]
    NoPendingCall,

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("peer session error: {0}")]
    Peer(#[from] PeerError),

    #[error("not connected to the relay")]
    NotConnected,

    #[error("signaling failure: {0}")]
    Signaling(String),
}
