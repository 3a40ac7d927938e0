//! Call manager for orchestrating the call lifecycle.
//!
//! The manager is constructed once and receives every inbound relay message
//! through [`CallManager::handle_message`]; nothing registers per-call
//! handlers. Peer events are tagged with the owning session's sequence
//! number so anything from a torn-down peer is discarded.

use super::error::CallError;
use super::state::{CallInvitation, CallPhase, CallSession, CallState, CallTransition};
use crate::events::{self, Event, EventBus};
use crate::identity::{EndpointId, IdentitySlot};
use crate::media::{LocalMedia, RenderSurface};
use crate::peer::{PeerEvent, PeerRole, PeerSessionFactory};
use crate::transport::Transport;
use crate::wire::{self, ClientMessage, ServerMessage, SignalEnvelope};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};

/// What to do with an inbound invitation while another one is pending.
/// Either way the outcome is deterministic; an invitation arriving while a
/// call session exists is always dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvitePolicy {
    /// Keep the pending invitation, drop the newer one.
    #[default]
    RejectNewer,
    /// Abandon the pending invitation (its caller is notified) and retain
    /// the newer one.
    ReplaceExisting,
}

/// Configuration for the call manager.
#[derive(Debug, Clone)]
pub struct CallManagerConfig {
    /// Name sent along with outgoing invitations.
    pub display_name: String,
    pub invite_policy: InvitePolicy,
    /// Unanswered invitations and outgoing attempts are abandoned after
    /// this window. `None` disables the timer.
    pub ring_timeout: Option<Duration>,
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            invite_policy: InvitePolicy::default(),
            ring_timeout: Some(Duration::from_secs(45)),
        }
    }
}

#[derive(Default)]
struct Slots {
    invite: Option<CallInvitation>,
    session: Option<CallSession>,
}

/// Orchestrates identity, relay transport, and peer sessions into the
/// observable call lifecycle.
pub struct CallManager {
    config: CallManagerConfig,
    identity: Arc<IdentitySlot>,
    peers: Arc<dyn PeerSessionFactory>,
    /// The local captured stream, shared read-only with every peer session.
    media: Arc<RwLock<Option<LocalMedia>>>,
    render: std::sync::RwLock<Option<Arc<dyn RenderSurface>>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    bus: EventBus,
    slots: Mutex<Slots>,
    next_seq: AtomicU64,
}

impl CallManager {
    pub fn new(
        config: CallManagerConfig,
        identity: Arc<IdentitySlot>,
        peers: Arc<dyn PeerSessionFactory>,
        media: Arc<RwLock<Option<LocalMedia>>>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            identity,
            peers,
            media,
            render: std::sync::RwLock::new(None),
            transport: RwLock::new(None),
            bus,
            slots: Mutex::new(Slots::default()),
            next_seq: AtomicU64::new(1),
        })
    }

    /// The transport for the current relay connection. Cleared when the
    /// connection drops.
    pub async fn set_transport(&self, transport: Option<Arc<dyn Transport>>) {
        *self.transport.write().await = transport;
    }

    pub fn set_render_surface(&self, surface: Option<Arc<dyn RenderSurface>>) {
        *self
            .render
            .write()
            .expect("RwLock should not be poisoned") = surface;
    }

    /// Observable state of the endpoint.
    pub async fn phase(&self) -> CallPhase {
        let slots = self.slots.lock().await;
        match (&slots.session, &slots.invite) {
            (Some(session), _) if session.state.is_calling() => CallPhase::Calling,
            (Some(_), _) => CallPhase::Connected,
            (None, Some(_)) => CallPhase::Ringing,
            (None, None) => CallPhase::Idle,
        }
    }

    /// The invitation currently ringing, if any.
    pub async fn pending_invitation(&self) -> Option<(EndpointId, String)> {
        let slots = self.slots.lock().await;
        slots
            .invite
            .as_ref()
            .map(|invite| (invite.from.clone(), invite.display_name.clone()))
    }

    /// Start an outgoing call to a target endpoint.
    ///
    /// Requires an already-acquired local stream and a registered identity;
    /// fails without any state change otherwise. On success the peer
    /// session starts generating its offer, which goes out as a `callUser`
    /// message once ready.
    pub async fn place_call(self: &Arc<Self>, target: EndpointId) -> Result<(), CallError> {
        let media = self
            .media
            .read()
            .await
            .clone()
            .ok_or(CallError::MediaUnavailable)?;
        let me = self.identity.get().ok_or(CallError::NotRegistered)?;

        let mut slots = self.slots.lock().await;
        if slots.session.is_some() || slots.invite.is_some() {
            return Err(CallError::CallInProgress);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (peer, peer_events) = self.peers.create(PeerRole::Initiator, media).await?;
        slots.session = Some(CallSession::new_outgoing(seq, target.clone(), peer));
        drop(slots);

        info!("Calling {target} as {me}");
        self.spawn_peer_pump(seq, peer_events);
        self.spawn_ring_timer(seq);
        self.bus
            .dispatch(&Event::OutgoingCall(events::OutgoingCall { to: target }));
        Ok(())
    }

    /// Accept the pending invitation.
    ///
    /// Creates a responder peer session, feeds it the retained offer, and
    /// moves to connected. The generated answer goes out as an `answerCall`
    /// message once ready. Without local media this fails and the
    /// invitation stays pending.
    pub async fn accept_call(self: &Arc<Self>) -> Result<(), CallError> {
        let media = self
            .media
            .read()
            .await
            .clone()
            .ok_or(CallError::MediaUnavailable)?;

        let mut slots = self.slots.lock().await;
        if slots.session.is_some() {
            return Err(CallError::CallInProgress);
        }
        let invite = slots.invite.take().ok_or(CallError::NoPendingCall)?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (peer, peer_events) = match self.peers.create(PeerRole::Responder, media).await {
            Ok(pair) => pair,
            Err(e) => {
                // Leave the invitation pending so the user may retry.
                slots.invite = Some(invite);
                return Err(e.into());
            }
        };

        if let Err(e) = peer.accept_signal(invite.offer.clone()).await {
            // The retained offer is unusable. Tell the caller and give up.
            warn!("Retained offer rejected: {e}");
            peer.terminate().await;
            drop(slots);
            let _ = self
                .send(&ClientMessage::EndCall {
                    to: invite.from.clone(),
                })
                .await;
            return Err(CallError::Signaling(e.to_string()));
        }

        slots.session = Some(CallSession::new_answered(
            seq,
            invite.from.clone(),
            invite.display_name.clone(),
            peer,
        ));
        drop(slots);

        info!("Accepted call from {}", invite.from);
        self.spawn_peer_pump(seq, peer_events);
        self.bus
            .dispatch(&Event::CallConnected(events::CallConnected {
                remote: invite.from,
            }));
        Ok(())
    }

    /// Reject the pending invitation. The inviter is notified with an
    /// `endCall` message.
    pub async fn reject_call(&self) -> Result<(), CallError> {
        let mut slots = self.slots.lock().await;
        let invite = slots.invite.take().ok_or(CallError::NoPendingCall)?;
        drop(slots);

        info!("Rejected call from {}", invite.from);
        if let Err(e) = self.send(&ClientMessage::EndCall { to: invite.from }).await {
            debug!("Could not notify caller of rejection: {e}");
        }
        Ok(())
    }

    /// End the current call attempt or connected call. Safe to call at any
    /// time; at idle it is a no-op, so repeated hang-ups produce no second
    /// observable transition.
    pub async fn leave_call(&self) {
        let mut slots = self.slots.lock().await;
        let Some(session) = &slots.session else {
            debug!("leave_call with no active call");
            return;
        };
        let transition = if session.state.is_calling() {
            CallTransition::Cancelled
        } else {
            CallTransition::Hangup
        };
        let remote = session.remote.clone();
        if let Err(e) = self.send(&ClientMessage::EndCall { to: remote }).await {
            debug!("Could not notify remote of hangup: {e}");
        }
        self.end_session_locked(&mut slots, transition).await;
    }

    /// Single entry point for inbound relay messages. `me` is consumed by
    /// the client before messages reach this point.
    pub async fn handle_message(self: &Arc<Self>, msg: ServerMessage) {
        match msg {
            ServerMessage::CallUser { from, name, signal } => {
                self.on_invitation(from, name, signal).await;
            }
            ServerMessage::CallAccepted { signal } => self.on_call_accepted(signal).await,
            ServerMessage::CallEnded { from } => self.on_remote_ended(from).await,
            ServerMessage::Me { .. } | ServerMessage::Unknown => {
                debug!("Ignoring message not meant for the call manager");
            }
        }
    }

    /// The relay connection dropped: terminal for any in-flight call and
    /// pending invitation, but nothing beyond them.
    pub async fn handle_transport_lost(&self) {
        let mut slots = self.slots.lock().await;
        if let Some(invite) = slots.invite.take() {
            self.bus
                .dispatch(&Event::InvitationCancelled(events::InvitationCancelled {
                    from: invite.from,
                }));
        }
        self.end_session_locked(&mut slots, CallTransition::SignalingLost)
            .await;
    }

    async fn on_invitation(self: &Arc<Self>, from: EndpointId, name: String, offer: SignalEnvelope) {
        let mut slots = self.slots.lock().await;
        if slots.session.is_some() {
            // At most one call per endpoint. This also resolves glare: while
            // our own attempt is in flight, a simultaneous inbound
            // invitation is dropped.
            warn!("Dropping invitation from {from}: call in progress");
            return;
        }
        if let Some(pending) = &slots.invite {
            match self.config.invite_policy {
                InvitePolicy::RejectNewer => {
                    warn!(
                        "Dropping invitation from {from}: already ringing for {}",
                        pending.from
                    );
                    return;
                }
                InvitePolicy::ReplaceExisting => {
                    let old = slots.invite.take().expect("pending invite checked above");
                    info!("Invitation from {from} supersedes {}", old.from);
                    if let Err(e) = self
                        .send(&ClientMessage::EndCall {
                            to: old.from.clone(),
                        })
                        .await
                    {
                        debug!("Could not notify superseded caller: {e}");
                    }
                    self.bus.dispatch(&Event::InvitationCancelled(
                        events::InvitationCancelled { from: old.from },
                    ));
                }
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        slots.invite = Some(CallInvitation {
            seq,
            from: from.clone(),
            display_name: name.clone(),
            offer,
            received_at: Utc::now(),
        });
        drop(slots);

        info!("Incoming call from {from} ({name})");
        self.spawn_ring_timer(seq);
        self.bus
            .dispatch(&Event::IncomingCall(events::IncomingCall { from, name }));
    }

    async fn on_call_accepted(&self, signal: SignalEnvelope) {
        let mut slots = self.slots.lock().await;
        let peer = match &slots.session {
            Some(session) if session.role == PeerRole::Initiator && session.state.is_calling() => {
                session.peer.clone()
            }
            _ => {
                warn!("Dropping callAccepted: not awaiting an answer");
                return;
            }
        };

        if let Err(e) = peer.accept_signal(signal).await {
            warn!("Remote answer could not be applied: {e}");
            self.end_session_locked(&mut slots, CallTransition::SignalingLost)
                .await;
            return;
        }

        let session = slots.session.as_mut().expect("session checked above");
        if let Err(e) = session.apply_transition(CallTransition::RemoteAccepted) {
            warn!("Unexpected accept: {e}");
            return;
        }
        let remote = session.remote.clone();
        drop(slots);

        info!("Call accepted by {remote}");
        self.bus
            .dispatch(&Event::CallConnected(events::CallConnected { remote }));
    }

    async fn on_remote_ended(&self, from: EndpointId) {
        let mut slots = self.slots.lock().await;
        if slots.invite.as_ref().is_some_and(|i| i.from == from) {
            slots.invite = None;
            info!("Caller {from} cancelled before we answered");
            drop(slots);
            self.bus
                .dispatch(&Event::InvitationCancelled(events::InvitationCancelled {
                    from,
                }));
            return;
        }
        if slots.session.as_ref().is_some_and(|s| s.remote == from) {
            self.end_session_locked(&mut slots, CallTransition::RemoteEnded)
                .await;
            return;
        }
        debug!("Dropping callEnded from {from}: no matching call");
    }

    fn spawn_peer_pump(self: &Arc<Self>, seq: u64, mut peer_events: mpsc::Receiver<PeerEvent>) {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = peer_events.recv().await {
                manager.handle_peer_event(seq, event).await;
            }
        });
    }

    fn spawn_ring_timer(self: &Arc<Self>, seq: u64) {
        let Some(timeout) = self.config.ring_timeout else {
            return;
        };
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.on_ring_timeout(seq).await;
        });
    }

    async fn on_ring_timeout(&self, seq: u64) {
        let mut slots = self.slots.lock().await;
        if slots
            .session
            .as_ref()
            .is_some_and(|s| s.seq == seq && s.state.is_calling())
        {
            let remote = slots.session.as_ref().expect("session checked above").remote.clone();
            warn!("Nobody answered {remote}, abandoning the call");
            if let Err(e) = self.send(&ClientMessage::EndCall { to: remote }).await {
                debug!("Could not notify remote of timeout: {e}");
            }
            self.end_session_locked(&mut slots, CallTransition::RingTimeout)
                .await;
            return;
        }
        if slots.invite.as_ref().is_some_and(|i| i.seq == seq) {
            let invite = slots.invite.take().expect("invite checked above");
            warn!("Invitation from {} rang out unanswered", invite.from);
            drop(slots);
            // Declining on timeout lets the caller end promptly instead of
            // waiting out their own timer.
            if let Err(e) = self.send(&ClientMessage::EndCall { to: invite.from.clone() }).await {
                debug!("Could not notify caller of ring timeout: {e}");
            }
            self.bus
                .dispatch(&Event::InvitationCancelled(events::InvitationCancelled {
                    from: invite.from,
                }));
        }
    }

    async fn handle_peer_event(&self, seq: u64, event: PeerEvent) {
        let mut slots = self.slots.lock().await;
        if slots.session.as_ref().map(|s| s.seq) != Some(seq) {
            // A late event from a torn-down peer. Sessions are never
            // reused, so anything not matching the live sequence is stale.
            debug!("Discarding stale peer event (seq {seq}): {event:?}");
            return;
        }

        match event {
            PeerEvent::LocalSignal(signal) => {
                self.on_local_signal(&mut slots, signal).await;
            }
            PeerEvent::Connected => {
                debug!("Direct media path established");
            }
            PeerEvent::RemoteMedia(media) => {
                let remote = slots
                    .session
                    .as_ref()
                    .expect("session checked above")
                    .remote
                    .clone();
                drop(slots);
                let surface = self
                    .render
                    .read()
                    .expect("RwLock should not be poisoned")
                    .clone();
                if let Some(surface) = surface {
                    surface.attach(media);
                }
                self.bus
                    .dispatch(&Event::RemoteMediaReady(events::RemoteMediaReady { remote }));
            }
            PeerEvent::Closed(reason) => {
                warn!("Peer session closed: {reason:?}");
                self.end_session_locked(&mut slots, CallTransition::ConnectionFailed)
                    .await;
            }
        }
    }

    /// Routes the single local-signal event by role: the initiator's offer
    /// becomes a `callUser` invitation, the responder's answer an
    /// `answerCall` reply.
    async fn on_local_signal(&self, slots: &mut Slots, signal: SignalEnvelope) {
        let (role, remote) = {
            let session = slots.session.as_ref().expect("checked by caller");
            (session.role, session.remote.clone())
        };

        let msg = match role {
            PeerRole::Initiator => {
                let Some(me) = self.identity.get() else {
                    warn!("Local signal ready but the relay identity is gone");
                    self.end_session_locked(slots, CallTransition::SignalingLost)
                        .await;
                    return;
                };
                ClientMessage::CallUser {
                    user_to_call: remote,
                    signal_data: signal,
                    from: me,
                    name: self.config.display_name.clone(),
                }
            }
            PeerRole::Responder => ClientMessage::AnswerCall { signal, to: remote },
        };

        if let Err(e) = self.send(&msg).await {
            warn!("Failed to send local signal: {e}");
            self.end_session_locked(slots, CallTransition::SignalingLost)
                .await;
        }
    }

    /// Tears down the current session: the slot is cleared (the machine is
    /// back at idle), the peer terminated, the render surface detached,
    /// and one `CallEnded` event dispatched. A session that already ended
    /// produces nothing further.
    async fn end_session_locked(&self, slots: &mut Slots, transition: CallTransition) {
        let Some(mut session) = slots.session.take() else {
            return;
        };
        if let Err(e) = session.apply_transition(transition) {
            debug!("Session already ended: {e}");
            return;
        }
        session.peer.terminate().await;

        let surface = self
            .render
            .read()
            .expect("RwLock should not be poisoned")
            .clone();
        if let Some(surface) = surface {
            surface.detach();
        }

        if let CallState::Ended { reason, .. } = session.state {
            info!("Call with {} ended: {reason:?}", session.remote);
            self.bus.dispatch(&Event::CallEnded(events::CallEnded {
                remote: session.remote,
                reason,
            }));
        }
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), CallError> {
        let transport = self
            .transport
            .read()
            .await
            .clone()
            .ok_or(CallError::NotConnected)?;
        let text = wire::encode(msg).map_err(|e| CallError::Signaling(e.to_string()))?;
        transport
            .send(&text)
            .await
            .map_err(|e| CallError::Signaling(e.to_string()))?;
        Ok(())
    }
}
