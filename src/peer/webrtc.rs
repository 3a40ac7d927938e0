//! Peer sessions over the `webrtc` crate.
//!
//! Signaling is trickle-free: the local description is emitted only after
//! ICE gathering completes, so the single envelope carries every candidate.
//! NAT traversal servers are external; their URLs come in via the factory.

use super::error::PeerError;
use super::{CloseReason, PeerEvent, PeerRole, PeerSession, PeerSessionFactory};
use crate::media::{LocalMedia, RemoteMedia};
use crate::wire::SignalEnvelope;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::track::track_remote::TrackRemote;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Creates peer sessions backed by real WebRTC peer connections.
pub struct WebRtcPeerFactory {
    ice_servers: Vec<String>,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerSessionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        role: PeerRole,
        local: LocalMedia,
    ) -> Result<(Arc<dyn PeerSession>, mpsc::Receiver<PeerEvent>), PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);
        for track in local.tracks() {
            pc.add_track(track.clone()).await?;
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let track_tx = event_tx.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let track_tx = track_tx.clone();
            Box::pin(async move {
                debug!("Remote track available: {} ({})", track.id(), track.kind());
                let _ = track_tx.send(PeerEvent::RemoteMedia(RemoteMedia { track })).await;
            })
        }));

        // Closed fires at most once even though several connection states
        // can report a dead session.
        let closed_sent = Arc::new(AtomicBool::new(false));
        let state_tx = event_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            let closed_sent = closed_sent.clone();
            Box::pin(async move {
                debug!("Peer connection state: {state}");
                let event = match state {
                    RTCPeerConnectionState::Connected => Some(PeerEvent::Connected),
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                        (!closed_sent.swap(true, Ordering::SeqCst))
                            .then_some(PeerEvent::Closed(CloseReason::Failed))
                    }
                    RTCPeerConnectionState::Closed => (!closed_sent.swap(true, Ordering::SeqCst))
                        .then_some(PeerEvent::Closed(CloseReason::Finished)),
                    _ => None,
                };
                if let Some(event) = event {
                    let _ = state_tx.send(event).await;
                }
            })
        }));

        if role == PeerRole::Initiator {
            let pc_offer = pc.clone();
            let offer_tx = event_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = generate_offer(&pc_offer, &offer_tx).await {
                    warn!("Offer generation failed: {e}");
                    let _ = offer_tx.send(PeerEvent::Closed(CloseReason::Failed)).await;
                }
            });
        }

        let session = Arc::new(WebRtcPeerSession {
            role,
            pc,
            events: event_tx,
            terminated: AtomicBool::new(false),
        });
        Ok((session, event_rx))
    }
}

struct WebRtcPeerSession {
    role: PeerRole,
    pc: Arc<RTCPeerConnection>,
    events: mpsc::Sender<PeerEvent>,
    terminated: AtomicBool,
}

#[async_trait]
impl PeerSession for WebRtcPeerSession {
    async fn accept_signal(&self, signal: SignalEnvelope) -> Result<(), PeerError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(PeerError::Terminated);
        }
        let desc: RTCSessionDescription = serde_json::from_value(signal.0)?;

        match self.role {
            PeerRole::Initiator => {
                // The remote answer completes the handshake.
                self.pc.set_remote_description(desc).await?;
                Ok(())
            }
            PeerRole::Responder => {
                self.pc.set_remote_description(desc).await?;
                let answer = self.pc.create_answer(None).await?;
                self.pc.set_local_description(answer).await?;
                let envelope = gathered_local_description(&self.pc).await?;
                let _ = self.events.send(PeerEvent::LocalSignal(envelope)).await;
                Ok(())
            }
        }
    }

    async fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.pc.close().await {
                debug!("Peer connection close: {e}");
            }
        }
    }
}

async fn generate_offer(
    pc: &Arc<RTCPeerConnection>,
    events: &mpsc::Sender<PeerEvent>,
) -> Result<(), PeerError> {
    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;
    let envelope = gathered_local_description(pc).await?;
    let _ = events.send(PeerEvent::LocalSignal(envelope)).await;
    Ok(())
}

/// Waits for ICE gathering to finish, then returns the local description
/// with all candidates batched in.
async fn gathered_local_description(
    pc: &Arc<RTCPeerConnection>,
) -> Result<SignalEnvelope, PeerError> {
    let mut gather_complete = pc.gathering_complete_promise().await;
    let _ = gather_complete.recv().await;

    let desc = pc
        .local_description()
        .await
        .ok_or(PeerError::NoLocalDescription)?;
    Ok(SignalEnvelope::new(serde_json::to_value(&desc)?))
}
