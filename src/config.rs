use crate::call::InvitePolicy;
use crate::media::MediaConstraints;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket URL of the rendezvous relay.
    pub relay_url: String,
    /// Name sent along with outgoing invitations.
    pub display_name: String,
    /// STUN/TURN servers handed to every peer session. The servers
    /// themselves are external infrastructure.
    pub ice_servers: Vec<String>,
    pub constraints: MediaConstraints,
    pub invite_policy: InvitePolicy,
    /// Unanswered calls are abandoned after this window. `None` disables
    /// the timer.
    pub ring_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:5000/ws".to_string(),
            display_name: String::new(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            constraints: MediaConstraints::default(),
            invite_policy: InvitePolicy::default(),
            ring_timeout: Some(Duration::from_secs(45)),
        }
    }
}
