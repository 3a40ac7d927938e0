//! Call state machine implementation.

use crate::identity::EndpointId;
use crate::peer::{PeerRole, PeerSession};
use crate::wire::SignalEnvelope;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Why a call session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// Local user hung up a connected call.
    Hangup,
    /// Local user cancelled before the callee accepted.
    Cancelled,
    /// The remote endpoint declined, cancelled, or hung up.
    RemoteEnded,
    /// The direct connection could not be established, or dropped after
    /// connecting.
    ConnectionFailed,
    /// The relay connection was lost, or an envelope could not be applied.
    SignalingLost,
    /// Nobody answered within the ring window.
    RingTimeout,
}

/// Current state of a call session.
#[derive(Debug, Clone, Serialize)]
pub enum CallState {
    /// Outgoing call: invitation sent, awaiting accept.
    Calling { dialed_at: DateTime<Utc> },
    /// Both sides agreed at the signaling level; media is being (or has
    /// been) established directly.
    Connected { connected_at: DateTime<Utc> },
    /// Call over. Rejects every further transition.
    Ended {
        reason: EndReason,
        ended_at: DateTime<Utc>,
    },
}

impl CallState {
    pub fn is_calling(&self) -> bool {
        matches!(self, Self::Calling { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }
}

/// State transitions for call sessions.
#[derive(Debug, Clone, Copy)]
pub enum CallTransition {
    RemoteAccepted,
    Cancelled,
    Hangup,
    RemoteEnded,
    ConnectionFailed,
    SignalingLost,
    RingTimeout,
}

/// The observable state of the whole endpoint. `Ringing` exists before any
/// session does (only an invitation is retained); `Ended` sessions are
/// cleared immediately, so the machine reads `Idle` again once a call is
/// over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallPhase {
    Idle,
    Calling,
    Ringing,
    Connected,
}

/// An inbound invitation retained while ringing, until the local user
/// accepts or it is abandoned.
#[derive(Debug, Clone)]
pub struct CallInvitation {
    pub seq: u64,
    pub from: EndpointId,
    pub display_name: String,
    pub offer: SignalEnvelope,
    pub received_at: DateTime<Utc>,
}

/// The active call record. Exactly one may exist per endpoint; its peer
/// session belongs to it for the session's entire lifetime and is never
/// reused across calls.
pub struct CallSession {
    pub seq: u64,
    pub role: PeerRole,
    pub remote: EndpointId,
    pub remote_name: Option<String>,
    pub peer: Arc<dyn PeerSession>,
    pub state: CallState,
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("seq", &self.seq)
            .field("role", &self.role)
            .field("remote", &self.remote)
            .field("remote_name", &self.remote_name)
            .field("state", &self.state)
            .finish()
    }
}

impl CallSession {
    /// Caller side: created when the local user initiates a call.
    pub fn new_outgoing(seq: u64, remote: EndpointId, peer: Arc<dyn PeerSession>) -> Self {
        Self {
            seq,
            role: PeerRole::Initiator,
            remote,
            remote_name: None,
            peer,
            state: CallState::Calling {
                dialed_at: Utc::now(),
            },
        }
    }

    /// Callee side: created when the local user accepts an invitation, so
    /// it starts out connected.
    pub fn new_answered(
        seq: u64,
        remote: EndpointId,
        remote_name: String,
        peer: Arc<dyn PeerSession>,
    ) -> Self {
        Self {
            seq,
            role: PeerRole::Responder,
            remote,
            remote_name: Some(remote_name),
            peer,
            state: CallState::Connected {
                connected_at: Utc::now(),
            },
        }
    }

    /// Apply a state transition. Returns error if the transition is invalid.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let ended = |reason| CallState::Ended {
            reason,
            ended_at: Utc::now(),
        };
        let new_state = match (&self.state, transition) {
            (CallState::Calling { .. }, CallTransition::RemoteAccepted) => CallState::Connected {
                connected_at: Utc::now(),
            },
            (CallState::Calling { .. }, CallTransition::Cancelled) => ended(EndReason::Cancelled),
            (CallState::Calling { .. }, CallTransition::RingTimeout) => {
                ended(EndReason::RingTimeout)
            }
            (CallState::Connected { .. }, CallTransition::Hangup) => ended(EndReason::Hangup),
            (
                CallState::Calling { .. } | CallState::Connected { .. },
                CallTransition::RemoteEnded,
            ) => ended(EndReason::RemoteEnded),
            (
                CallState::Calling { .. } | CallState::Connected { .. },
                CallTransition::ConnectionFailed,
            ) => ended(EndReason::ConnectionFailed),
            (
                CallState::Calling { .. } | CallState::Connected { .. },
                CallTransition::SignalingLost,
            ) => ended(EndReason::SignalingLost),
            (current, attempted) => {
                return Err(InvalidTransition {
                    current_state: format!("{current:?}"),
                    attempted: format!("{attempted:?}"),
                });
            }
        };
        self.state = new_state;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerError;
    use async_trait::async_trait;

    struct NullPeer;

    #[async_trait]
    impl PeerSession for NullPeer {
        async fn accept_signal(&self, _signal: SignalEnvelope) -> Result<(), PeerError> {
            Ok(())
        }

        async fn terminate(&self) {}
    }

    fn make_outgoing() -> CallSession {
        CallSession::new_outgoing(1, EndpointId::from("abc123"), Arc::new(NullPeer))
    }

    /// Flow: Calling → Connected → Ended
    #[test]
    fn test_outgoing_call_flow() {
        let mut call = make_outgoing();
        assert!(call.state.is_calling());
        assert_eq!(call.role, PeerRole::Initiator);

        call.apply_transition(CallTransition::RemoteAccepted)
            .unwrap();
        assert!(call.state.is_connected());

        call.apply_transition(CallTransition::Hangup).unwrap();
        assert!(call.state.is_ended());
        if let CallState::Ended { reason, .. } = call.state {
            assert_eq!(reason, EndReason::Hangup);
        }
    }

    /// An answered session starts out connected.
    #[test]
    fn test_answered_call_flow() {
        let mut call = CallSession::new_answered(
            2,
            EndpointId::from("xyz789"),
            "Alice".to_string(),
            Arc::new(NullPeer),
        );
        assert!(call.state.is_connected());
        assert_eq!(call.role, PeerRole::Responder);
        assert_eq!(call.remote_name.as_deref(), Some("Alice"));

        call.apply_transition(CallTransition::RemoteEnded).unwrap();
        assert!(call.state.is_ended());
    }

    #[test]
    fn test_cancel_before_accept() {
        let mut call = make_outgoing();
        call.apply_transition(CallTransition::Cancelled).unwrap();
        if let CallState::Ended { reason, .. } = call.state {
            assert_eq!(reason, EndReason::Cancelled);
        } else {
            panic!("expected Ended");
        }
    }

    #[test]
    fn test_ring_timeout_only_while_calling() {
        let mut call = make_outgoing();
        call.apply_transition(CallTransition::RemoteAccepted)
            .unwrap();
        assert!(call.apply_transition(CallTransition::RingTimeout).is_err());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut call = make_outgoing();
        // Hangup only applies to connected calls; cancel is the Calling exit.
        assert!(call.apply_transition(CallTransition::Hangup).is_err());
        assert!(call.state.is_calling());
    }

    /// Ended rejects everything: terminating twice produces no second
    /// observable transition.
    #[test]
    fn test_ended_rejects_transitions() {
        let mut call = make_outgoing();
        call.apply_transition(CallTransition::ConnectionFailed)
            .unwrap();
        assert!(call.state.is_ended());

        assert!(
            call.apply_transition(CallTransition::RemoteAccepted)
                .is_err()
        );
        assert!(call.apply_transition(CallTransition::Cancelled).is_err());
        assert!(call.apply_transition(CallTransition::Hangup).is_err());
        if let CallState::Ended { reason, .. } = call.state {
            assert_eq!(reason, EndReason::ConnectionFailed);
        }
    }

    #[test]
    fn test_signaling_loss_from_both_states() {
        let mut calling = make_outgoing();
        calling
            .apply_transition(CallTransition::SignalingLost)
            .unwrap();
        assert!(calling.state.is_ended());

        let mut connected = make_outgoing();
        connected
            .apply_transition(CallTransition::RemoteAccepted)
            .unwrap();
        connected
            .apply_transition(CallTransition::SignalingLost)
            .unwrap();
        assert!(connected.state.is_ended());
    }
}
