//! Collaborator contracts for media capture and rendering.
//!
//! Capture and rendering are thin platform wrappers outside this crate's
//! scope. The traits here are the whole contract: a source supplies the
//! local stream once at startup, a surface consumes the remote stream while
//! a call is connected.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    /// Capture permission denied or no device present. Not retried.
    #[error("local media unavailable: {0}")]
    Unavailable(String),
}

/// The local captured stream, acquired once and shared read-only by every
/// peer session created afterwards.
#[derive(Clone, Default)]
pub struct LocalMedia {
    tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn TrackLocal + Send + Sync>] {
        &self.tracks
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// One inbound media track from the remote peer.
#[derive(Clone)]
pub struct RemoteMedia {
    pub track: Arc<TrackRemote>,
}

impl fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMedia")
            .field("id", &self.track.id())
            .finish()
    }
}

/// Supplies the local captured stream.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMedia, MediaError>;
}

/// Displays the remote stream. Attach/detach is the whole contract.
pub trait RenderSurface: Send + Sync {
    fn attach(&self, media: RemoteMedia);
    fn detach(&self);
}
