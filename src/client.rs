//! Process-level client: one relay connection, one identity, one call at a
//! time.

use crate::call::{CallError, CallManager, CallManagerConfig, CallPhase};
use crate::config::ClientConfig;
use crate::events::{self, Event, EventBus};
use crate::identity::{EndpointId, IdentitySlot};
use crate::media::{LocalMedia, MediaError, MediaSource, RenderSurface};
use crate::peer::PeerSessionFactory;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::wire::{self, ServerMessage};
use anyhow::Result;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

/// Owns the relay connection and everything scoped to it: the registered
/// identity, the shared local stream, and the call manager. Transport and
/// peer factories are injected, so tests run against doubles.
pub struct CallClient {
    config: ClientConfig,
    transports: Arc<dyn TransportFactory>,
    media_source: Arc<dyn MediaSource>,
    identity: Arc<IdentitySlot>,
    media: Arc<RwLock<Option<LocalMedia>>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    bus: EventBus,
    manager: Arc<CallManager>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl CallClient {
    pub fn new(
        config: ClientConfig,
        transports: Arc<dyn TransportFactory>,
        peers: Arc<dyn PeerSessionFactory>,
        media_source: Arc<dyn MediaSource>,
    ) -> Arc<Self> {
        let bus = EventBus::new();
        let identity = Arc::new(IdentitySlot::new());
        let media = Arc::new(RwLock::new(None));
        // One manager with one subscription for the client's lifetime; all
        // inbound messages flow through it regardless of how many calls
        // come and go.
        let manager = CallManager::new(
            CallManagerConfig {
                display_name: config.display_name.clone(),
                invite_policy: config.invite_policy,
                ring_timeout: config.ring_timeout,
            },
            identity.clone(),
            peers,
            media.clone(),
            bus.clone(),
        );

        Arc::new(Self {
            config,
            transports,
            media_source,
            identity,
            media,
            transport: RwLock::new(None),
            bus,
            manager,
            dispatch: Mutex::new(None),
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Identity assigned by the relay for the current connection.
    pub fn local_identity(&self) -> Option<EndpointId> {
        self.identity.get()
    }

    pub fn set_render_surface(&self, surface: Option<Arc<dyn RenderSurface>>) {
        self.manager.set_render_surface(surface);
    }

    /// Acquires the local stream once; every later peer session shares it.
    pub async fn acquire_media(&self) -> Result<(), MediaError> {
        let media = self.media_source.acquire(self.config.constraints).await?;
        info!("Local media acquired");
        *self.media.write().await = Some(media);
        Ok(())
    }

    /// Connects to the relay and starts the dispatch loop. The identity
    /// arrives as the first relay message after the connection opens.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.transport.read().await.is_some() {
            anyhow::bail!("already connected to the relay");
        }
        let (transport, transport_events) = self.transports.connect(&self.config.relay_url).await?;
        *self.transport.write().await = Some(transport.clone());
        self.manager.set_transport(Some(transport)).await;

        let client = self.clone();
        let handle = tokio::spawn(async move {
            client.dispatch_loop(transport_events).await;
        });
        *self.dispatch.lock().await = Some(handle);
        Ok(())
    }

    async fn dispatch_loop(self: &Arc<Self>, mut transport_events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = transport_events.recv().await {
            match event {
                TransportEvent::Connected => {
                    info!("Relay connection established");
                }
                TransportEvent::TextReceived(text) => match wire::decode(&text) {
                    Ok(ServerMessage::Me { identity }) => {
                        self.identity.assign(identity.clone());
                        self.bus
                            .dispatch(&Event::Registered(events::Registered { identity }));
                    }
                    Ok(ServerMessage::Unknown) => {
                        warn!("Dropping relay frame with unknown event");
                    }
                    Ok(msg) => self.manager.handle_message(msg).await,
                    Err(e) => {
                        warn!("Dropping malformed relay frame: {e}");
                    }
                },
                TransportEvent::Disconnected => {
                    // Terminal for the identity and any in-flight call, but
                    // not for the process; reconnection is up to the caller.
                    warn!("Relay connection lost");
                    self.identity.clear();
                    self.manager.set_transport(None).await;
                    self.manager.handle_transport_lost().await;
                    self.bus.dispatch(&Event::RelayDisconnected);
                    break;
                }
            }
        }
        debug!("Dispatch loop finished");
    }

    pub async fn phase(&self) -> CallPhase {
        self.manager.phase().await
    }

    pub async fn pending_invitation(&self) -> Option<(EndpointId, String)> {
        self.manager.pending_invitation().await
    }

    pub async fn place_call(&self, target: EndpointId) -> Result<(), CallError> {
        self.manager.place_call(target).await
    }

    pub async fn accept_call(&self) -> Result<(), CallError> {
        self.manager.accept_call().await
    }

    pub async fn reject_call(&self) -> Result<(), CallError> {
        self.manager.reject_call().await
    }

    pub async fn leave_call(&self) {
        self.manager.leave_call().await
    }

    /// Deterministic teardown: leaves any call, releases the local stream,
    /// and closes the relay connection.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.manager.leave_call().await;
        *self.media.write().await = None;
        self.manager.set_transport(None).await;
        if let Some(transport) = self.transport.write().await.take() {
            transport.disconnect().await;
        }
        if let Some(handle) = self.dispatch.lock().await.take() {
            // The read pump ends once the socket closes, which finishes the
            // dispatch task; abort covers transports that never notice.
            handle.abort();
        }
        self.identity.clear();
    }
}
