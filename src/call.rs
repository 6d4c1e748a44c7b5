//! Call model: identifiers, lifecycle states, termination classification and
//! remote-stream synthesis
//!
//! The client is party to at most one call at a time. The [`CallSession`]
//! value lives in a single slot owned by the call manager and is replaced
//! wholesale on every lifecycle transition that creates or destroys a call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::media::{MediaConnection, MediaStream, MediaTrack, TrackKind};
use crate::transport::CallChannel;

/// Unique identifier for a call
pub type CallId = uuid::Uuid;

/// Lifecycle state of the single active call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// Invite sent or answer in progress, confirmation pending
    Connecting,
    /// Confirmed with a live peer media connection
    Established,
    /// Terminated locally or remotely
    Ended,
}

/// Who initiated the call on this side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// We sent the invite
    Outgoing,
    /// We answered an incoming invitation
    Answered,
}

/// Which side originated a termination or failure signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Originator {
    Local,
    Remote,
}

impl std::fmt::Display for Originator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Originator::Local => write!(f, "local"),
            Originator::Remote => write!(f, "remote"),
        }
    }
}

/// Cause attached to a termination or failure signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationCause {
    Canceled,
    Terminated,
    Bye,
    Rejected,
    RequestTimeout,
    Busy,
    NotFound,
    ConnectionError,
    Other(String),
}

impl std::fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationCause::Canceled => write!(f, "Canceled"),
            TerminationCause::Terminated => write!(f, "Terminated"),
            TerminationCause::Bye => write!(f, "Bye"),
            TerminationCause::Rejected => write!(f, "Rejected"),
            TerminationCause::RequestTimeout => write!(f, "Request Timeout"),
            TerminationCause::Busy => write!(f, "Busy"),
            TerminationCause::NotFound => write!(f, "Not Found"),
            TerminationCause::ConnectionError => write!(f, "Connection Error"),
            TerminationCause::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Classify a termination as benign ("canceled") or a real failure
///
/// Rejected and request-timeout causes are always benign; canceled, bye and
/// terminated causes are benign only when we originated them ourselves.
pub fn is_canceled_termination(cause: &TerminationCause, originator: Originator) -> bool {
    match cause {
        TerminationCause::Rejected | TerminationCause::RequestTimeout => true,
        TerminationCause::Canceled | TerminationCause::Terminated | TerminationCause::Bye => {
            originator == Originator::Local
        }
        _ => false,
    }
}

/// The single in-progress or established call
///
/// Owned by the call manager's current-call slot; the presentation manager
/// holds a read-only view of the same slot. Replaced, never mutated in place,
/// except for the `state` transition recorded by the owner.
#[derive(Clone)]
pub struct CallSession {
    pub id: CallId,
    pub direction: CallDirection,
    /// Remote number or conference target this call is connected to
    pub number: String,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    /// Underlying signaling channel for this call
    pub channel: Arc<dyn CallChannel>,
    /// Peer media connection, present once the peer channel is created
    pub media: Option<Arc<dyn MediaConnection>>,
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("number", &self.number)
            .field("state", &self.state)
            .field("started_at", &self.started_at)
            .field("has_media", &self.media.is_some())
            .finish_non_exhaustive()
    }
}

impl CallSession {
    pub fn new(direction: CallDirection, number: String, channel: Arc<dyn CallChannel>) -> Self {
        Self {
            id: CallId::new_v4(),
            direction,
            number,
            state: CallState::Connecting,
            started_at: Utc::now(),
            channel,
            media: None,
        }
    }
}

/// Synthesize remote streams from receiver tracks.
///
/// When any video track is present, each video track anchors one stream keyed
/// by its track id and adopts its adjacent unconsumed audio track: the
/// preceding one by convention, falling back to the immediately following one
/// so a reversed (video, audio) pair still produces a single stream.
/// Adjacency is the only correlation signal the transport provides, so the
/// ordering contract must be preserved exactly. Without video tracks, each
/// audio track becomes its own single-track stream.
///
/// Streams are cached by their anchor track id and reused across calls so
/// that repeated queries hand back stable stream identities.
pub fn synthesize_remote_streams(
    tracks: &[MediaTrack],
    cache: &DashMap<String, MediaStream>,
) -> Vec<MediaStream> {
    let has_video = tracks.iter().any(|t| t.kind == TrackKind::Video);

    if !has_video {
        return tracks
            .iter()
            .filter(|t| t.kind == TrackKind::Audio)
            .map(|audio| cached_stream(cache, &audio.id, vec![audio.clone()]))
            .collect();
    }

    let mut consumed = vec![false; tracks.len()];
    let mut streams = Vec::new();

    for (index, track) in tracks.iter().enumerate() {
        if track.kind != TrackKind::Video {
            continue;
        }
        consumed[index] = true;

        let audio_index = index
            .checked_sub(1)
            .filter(|&prev| tracks[prev].kind == TrackKind::Audio && !consumed[prev])
            .or_else(|| {
                let next = index + 1;
                (next < tracks.len()
                    && tracks[next].kind == TrackKind::Audio
                    && !consumed[next])
                    .then_some(next)
            });

        let mut stream_tracks = Vec::with_capacity(2);
        if let Some(audio_index) = audio_index {
            consumed[audio_index] = true;
            stream_tracks.push(tracks[audio_index].clone());
        }
        stream_tracks.push(track.clone());

        streams.push(cached_stream(cache, &track.id, stream_tracks));
    }

    streams
}

fn cached_stream(
    cache: &DashMap<String, MediaStream>,
    anchor_id: &str,
    tracks: Vec<MediaTrack>,
) -> MediaStream {
    if let Some(existing) = cache.get(anchor_id) {
        if existing.tracks == tracks {
            return existing.clone();
        }
    }
    let stream = MediaStream {
        id: anchor_id.to_string(),
        tracks,
    };
    cache.insert(anchor_id.to_string(), stream.clone());
    stream
}
