use chrono::Local;
use clap::Parser;
use duocall::client::CallClient;
use duocall::config::ClientConfig;
use duocall::events::{Event, EventHandler};
use duocall::identity::EndpointId;
use duocall::media::{LocalMedia, MediaConstraints, MediaError, MediaSource, RemoteMedia, RenderSurface};
use duocall::peer::WebRtcPeerFactory;
use duocall::socket::WsTransportFactory;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

// Demo client: registers with the relay, prints the assigned id, and either
// waits for a call (answering automatically) or dials the given endpoint.
//
// Usage:
//   cargo run -- --name Alice
//   cargo run -- --name Bob --call <endpoint-id>

#[derive(Parser)]
#[command(name = "duocall", about = "Peer-to-peer calls through a rendezvous relay")]
struct Args {
    /// WebSocket URL of the rendezvous relay
    #[arg(long, default_value = "ws://localhost:5000/ws")]
    relay: String,

    /// Display name sent with outgoing calls
    #[arg(long, short, default_value = "")]
    name: String,

    /// Endpoint id to call once registered
    #[arg(long, short)]
    call: Option<String>,

    /// Skip the video track
    #[arg(long)]
    audio_only: bool,
}

/// Stand-in for a platform capture layer: supplies silent placeholder
/// tracks instead of camera/microphone frames.
struct StaticMediaSource;

#[async_trait::async_trait]
impl MediaSource for StaticMediaSource {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMedia, MediaError> {
        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "audio".to_owned(),
                "duocall".to_owned(),
            )));
        }
        if constraints.video {
            tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                "duocall".to_owned(),
            )));
        }
        if tracks.is_empty() {
            return Err(MediaError::Unavailable("no tracks requested".to_string()));
        }
        Ok(LocalMedia::new(tracks))
    }
}

/// Stand-in for a rendering view.
struct LogSurface;

impl RenderSurface for LogSurface {
    fn attach(&self, media: RemoteMedia) {
        info!("Remote media attached: {}", media.track.id());
    }

    fn detach(&self) {
        info!("Remote media detached");
    }
}

/// Answers the first incoming call and narrates the lifecycle.
struct AutoAnswer {
    client: Arc<CallClient>,
}

impl EventHandler for AutoAnswer {
    fn handle_event(&self, event: &Event) {
        match event {
            Event::Registered(r) => {
                info!("Your id: {} (share it to receive calls)", r.identity);
            }
            Event::IncomingCall(call) => {
                info!("{} ({}) is calling, answering", call.name, call.from);
                let client = self.client.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.accept_call().await {
                        warn!("Could not answer: {e}");
                    }
                });
            }
            Event::CallConnected(c) => info!("Connected to {}", c.remote),
            Event::CallEnded(e) => info!("Call with {} ended: {:?}", e.remote, e.reason),
            Event::InvitationCancelled(i) => info!("{} gave up before we answered", i.from),
            Event::RelayDisconnected => warn!("Relay connection lost"),
            _ => {}
        }
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        let config = ClientConfig {
            relay_url: args.relay,
            display_name: args.name,
            constraints: MediaConstraints {
                video: !args.audio_only,
                audio: true,
            },
            ..Default::default()
        };

        let peers = Arc::new(WebRtcPeerFactory::new(config.ice_servers.clone()));
        let client = CallClient::new(
            config,
            Arc::new(WsTransportFactory::new()),
            peers,
            Arc::new(StaticMediaSource),
        );
        client.set_render_surface(Some(Arc::new(LogSurface)));
        client.event_bus().add_handler(Arc::new(AutoAnswer {
            client: client.clone(),
        }));

        if let Err(e) = client.acquire_media().await {
            error!("Media acquisition failed: {e}");
            return;
        }
        if let Err(e) = client.connect().await {
            error!("Could not reach the relay: {e}");
            return;
        }

        if let Some(target) = args.call {
            if !wait_for_registration(&client).await {
                error!("Relay never assigned an identity");
                client.shutdown().await;
                return;
            }
            if let Err(e) = client.place_call(EndpointId::new(target)).await {
                error!("Call failed: {e}");
                client.shutdown().await;
                return;
            }
        }

        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl-c");
        client.shutdown().await;
    });
}

async fn wait_for_registration(client: &CallClient) -> bool {
    for _ in 0..50 {
        if client.local_identity().is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    false
}
