//! Peer session adapter.
//!
//! A peer session wraps exactly one direct connection attempt. It is created
//! for one call, never reused, and torn down with the call. Signaling is
//! trickle-free: all local connectivity information is batched into a single
//! envelope emitted once per session.

mod error;
mod webrtc;

pub use self::webrtc::WebRtcPeerFactory;
pub use error::PeerError;

use crate::media::{LocalMedia, RemoteMedia};
use crate::wire::SignalEnvelope;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Begins generating an offer as soon as the session exists.
    Initiator,
    /// Waits for an offer supplied via `accept_signal`.
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The connection closed in an orderly fashion.
    Finished,
    /// No viable network path, or the path dropped after connecting.
    Failed,
}

/// Events produced by a peer session.
#[derive(Debug)]
pub enum PeerEvent {
    /// Fires once, when the local description and all candidates are ready
    /// to be sent to the remote side.
    LocalSignal(SignalEnvelope),
    /// The direct media path is established.
    Connected,
    /// A remote media track became available.
    RemoteMedia(RemoteMedia),
    /// The session is gone. Fires at most once.
    Closed(CloseReason),
}

/// One direct peer connection attempt.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Feeds a received remote envelope into the connection. For an
    /// initiator this is the answer that completes the handshake; for a
    /// responder it is the offer that triggers answer generation.
    async fn accept_signal(&self, signal: SignalEnvelope) -> Result<(), PeerError>;

    /// Tears the connection down immediately. Idempotent, safe to call from
    /// any state including before signaling completes.
    async fn terminate(&self);
}

/// Allocates peer sessions. Injected into the call manager so tests can
/// substitute scripted doubles.
#[async_trait]
pub trait PeerSessionFactory: Send + Sync {
    async fn create(
        &self,
        role: PeerRole,
        local: LocalMedia,
    ) -> Result<(Arc<dyn PeerSession>, mpsc::Receiver<PeerEvent>), PeerError>;
}
