//! Relay transport seam.
//!
//! The transport is a dumb pipe for whole text frames with no knowledge of
//! the signaling protocol. It is injected into the client (never a process
//! global), so tests and embedders can substitute their own implementation.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the relay.
    TextReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active relay connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one text frame to the relay. Fire and forget: there is no
    /// delivery acknowledgment.
    async fn send(&self, text: &str) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Connects to the relay and returns the transport along with a stream
    /// of events.
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}
