//! One-to-one audio/video calling over a rendezvous relay.
//!
//! The relay only ferries signaling envelopes between two endpoints; once
//! the offer/answer exchange completes, media flows directly between peers.

pub mod call;
pub mod client;
pub mod config;
pub mod events;
pub mod identity;
pub mod media;
pub mod peer;
pub mod socket;
pub mod transport;
pub mod wire;

pub use call::{CallError, CallPhase, EndReason, InvitePolicy};
pub use client::CallClient;
pub use config::ClientConfig;
pub use identity::EndpointId;
