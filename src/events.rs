//! Domain events published by the client
//!
//! Events are split across three lifecycle scopes, each with its own typed
//! bus: connection-level ([`ConnectionEvent`]), call-level ([`CallEvent`])
//! and notification-level ([`NotifyEvent`], decoded from the vendor
//! extension protocol).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::TerminationCause;

/// Priority tag for consumers draining a burst of events
///
/// Every event exposes its tag through a `priority()` method; high-priority
/// events demand an immediate reaction (teardowns, failures, admin
/// directives), low-priority ones are progress chatter that can be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    Low,
    Normal,
    High,
}

/// Caller metadata carried by incoming-call events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCallInfo {
    pub display_name: Option<String>,
    pub host: String,
    pub number: String,
    pub received_at: DateTime<Utc>,
}

/// Connection-scope events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    Disconnected,
    Registered,
    Unregistered,
    RegistrationFailed { reason: String },
    /// A remote invitation is pending; see the incoming-call manager
    IncomingCall { info: IncomingCallInfo },
    /// The pending invitation was declined locally
    DeclinedIncomingCall { info: IncomingCallInfo },
    /// The pending invitation failed remotely before being consumed
    FailedIncomingCall { info: IncomingCallInfo },
    /// The pending invitation was torn down locally before being consumed
    TerminatedIncomingCall { info: IncomingCallInfo },
}

impl ConnectionEvent {
    pub fn priority(&self) -> EventPriority {
        match self {
            ConnectionEvent::Disconnected
            | ConnectionEvent::RegistrationFailed { .. }
            | ConnectionEvent::FailedIncomingCall { .. } => EventPriority::High,
            ConnectionEvent::Connecting => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }
}

/// Call-scope events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallEvent {
    /// The peer media channel is created and the call is confirmed
    PeerConnectionConfirmed,
    /// The server ended the call; published before the session reset
    EndedFromServer { cause: TerminationCause },
    /// Outgoing presentation sequence is starting
    PresentationStart,
    /// Outgoing presentation is live
    PresentationStarted { stream_id: String },
    /// Outgoing presentation teardown is starting
    PresentationEnd,
    /// Presentation is fully stopped (or synthesized when the session died)
    PresentationEnded { stream_id: String },
    /// A presentation start/update sequence failed
    PresentationFailed { reason: String },
    /// The server announced an inbound secondary (content) stream
    AvailableSecondRemoteStream,
    /// The inbound secondary stream went away
    NotAvailableSecondRemoteStream,
    /// The server demands we stop our outgoing presentation
    MustStopPresentation,
}

impl CallEvent {
    pub fn priority(&self) -> EventPriority {
        match self {
            CallEvent::EndedFromServer { .. }
            | CallEvent::PresentationFailed { .. }
            | CallEvent::MustStopPresentation => EventPriority::High,
            CallEvent::PresentationStart | CallEvent::PresentationEnd => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }
}

/// License grade granted by the server for this participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseType {
    Audio,
    Video,
    AudioPlusPresentation,
}

/// Role the server moved this participant to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantRole {
    Spectator,
    Participant,
}

/// Notification-scope events, decoded from notify envelopes and typed info
/// messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyEvent {
    /// Conference room entry acknowledged
    EnterRoom { room: String },
    /// Audio/video channel assignment for this participant
    Channels { audio: String, video: String },
    /// License grade to apply
    UseLicense { license: LicenseType },
    /// Moved between spectators and participants
    ParticipantMoved { role: ParticipantRole },
    WebcastStarted { conference: String },
    WebcastStopped { conference: String },
    ModeratorAdded { conference: String },
    ModeratorRemoved { conference: String },
    WordRequestAccepted { conference: String },
    WordRequestRejected { conference: String },
    ParticipantMovedToWebcast { conference: String },
    AccountChanged,
    AccountDeleted,
    ParticipantTokenIssued {
        conference: String,
        participant: String,
        jwt: String,
    },
    /// Admin switched this participant's camera on
    AdminStartMainCam { is_sync_forced: bool },
    /// Admin switched this participant's camera off
    AdminStopMainCam { is_sync_forced: bool },
    /// Admin switched this participant's microphone on
    AdminStartMic { is_sync_forced: bool },
    /// Admin switched this participant's microphone off
    AdminStopMic { is_sync_forced: bool },
    /// Shared forced/advisory sync channel; published for resume/pause
    /// directives only when the sync-mode header was present at all
    AdminForceSyncMediaState { is_sync_forced: bool },
    /// Server-imposed cap on the outgoing main camera resolution
    MaxMainCamResolution { resolution: String },
}

impl NotifyEvent {
    pub fn priority(&self) -> EventPriority {
        match self {
            NotifyEvent::AccountDeleted
            | NotifyEvent::AdminStartMainCam { .. }
            | NotifyEvent::AdminStopMainCam { .. }
            | NotifyEvent::AdminStartMic { .. }
            | NotifyEvent::AdminStopMic { .. }
            | NotifyEvent::AdminForceSyncMediaState { .. } => EventPriority::High,
            NotifyEvent::AccountChanged => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }
}
