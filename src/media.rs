//! Media model and the seam to the browser media engine
//!
//! The client never touches codecs, ICE or encoding. Everything it needs from
//! the media layer is behind [`MediaConnection`]: start/stop/replace the
//! presentation sender, cap its bitrate, and enumerate receiver tracks so the
//! call manager can synthesize remote streams.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientResult;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A single audio or video track, identified by the transport-assigned id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// A stream of one or two tracks
///
/// Remote streams are synthesized by the call manager from receiver tracks;
/// local streams are supplied by the host application for presentations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStream {
    /// Stable stream identity; for synthesized remote streams this is the
    /// anchor track's id
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }
}

/// Peer media connection for one call, supplied by the transport's channel
///
/// Implemented by the host application over its media engine. All operations
/// are fallible; the presentation manager maps failures into
/// `PresentationFailed` events.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    /// Begin sending the given stream as the secondary (presentation) media
    async fn start_presentation(&self, stream: &MediaStream) -> ClientResult<()>;

    /// Stop sending the given presentation stream
    async fn stop_presentation(&self, stream: &MediaStream) -> ClientResult<()>;

    /// Swap the outgoing presentation track without renegotiation
    async fn replace_presentation_track(&self, stream: &MediaStream) -> ClientResult<()>;

    /// Cap the outgoing presentation sender's bitrate
    async fn set_outgoing_bitrate_cap(&self, kbps: u32) -> ClientResult<()>;

    /// Snapshot of receiver tracks, in transport arrival order
    ///
    /// Ordering matters: audio tracks immediately preceding their paired
    /// video track are the only correlation signal available.
    fn receiver_tracks(&self) -> Vec<MediaTrack>;
}
