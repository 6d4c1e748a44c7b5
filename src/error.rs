//! Error types for the conference signaling client
//!
//! All public operations return [`ClientResult`]. The error enum carries the
//! classification the rest of the crate relies on: configuration errors fail
//! fast, transient transport errors feed the connect retry loop, and benign
//! call terminations are detected with [`crate::call::is_canceled_termination`].

use thiserror::Error;

use crate::call::{Originator, TerminationCause};

/// Result type used throughout the crate
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the signaling client
///
/// # Examples
///
/// ```
/// use sipconf_client_core::{ClientError, ClientResult};
///
/// fn validate(user: Option<&str>) -> ClientResult<()> {
///     match user {
///         Some(_) => Ok(()),
///         None => Err(ClientError::InvalidConfig {
///             field: "user".to_string(),
///             reason: "required when registration is requested".to_string(),
///         }),
///     }
/// }
///
/// assert!(validate(None).is_err());
/// ```
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Missing or contradictory configuration, rejected before any attempt
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Failure reported by the transport adapter
    ///
    /// `transient` is true for handshake/websocket-opening failures, which
    /// the connection manager absorbs into its retry loop.
    #[error("Transport failure: {reason}")]
    TransportFailure { reason: String, transient: bool },

    /// The availability probe observed a disconnect before connecting
    #[error("Telephony is not available")]
    TelephonyUnavailable,

    /// An operation required a started transport session
    #[error("Transport is not initialized")]
    TransportNotInitialized,

    /// An operation required an established call
    #[error("No rtcSession established")]
    NoEstablishedSession,

    /// Accept/decline was requested with no pending invitation
    #[error("No incomingRTCSession")]
    NoIncomingCall,

    /// Outgoing invite or answer could not be set up
    #[error("Call setup failed: {reason}")]
    CallSetupFailed { reason: String },

    /// The call ended; whether this is benign depends on cause and originator
    #[error("Call terminated: {cause} ({originator})")]
    CallTerminated {
        cause: TerminationCause,
        originator: Originator,
    },

    /// SIP registration was refused
    #[error("Registration failed: {reason}")]
    RegistrationFailed { reason: String },

    /// `start()` was called while a presentation stream is already active
    #[error("Presentation is already started")]
    PresentationAlreadyStarted,

    /// `update()` was called with no active presentation
    #[error("Presentation has not started yet")]
    PresentationNotStarted,

    /// A presentation start/stop sequence failed partway
    #[error("Presentation failed: {reason}")]
    PresentationFailed { reason: String },

    /// Malformed inbound notification; logged and dropped at the decoder
    #[error("Decode error: {reason}")]
    DecodeError { reason: String },

    /// Catch-all for internal invariant violations
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl ClientError {
    /// Whether the connect retry loop may absorb this error and try again
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ClientError::TransportFailure { transient: true, .. })
    }

    /// Whether this error represents an expected/benign call termination
    ///
    /// Callers treat canceled terminations as a quiet outcome rather than a
    /// failure: they are swallowed by `hang_up()` and never logged as errors.
    pub fn is_canceled(&self) -> bool {
        match self {
            ClientError::CallTerminated { cause, originator } => {
                crate::call::is_canceled_termination(cause, *originator)
            }
            _ => false,
        }
    }

    /// Coarse error category used in structured logs
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::InvalidConfig { .. } => "config",
            ClientError::TransportFailure { .. }
            | ClientError::TransportNotInitialized
            | ClientError::TelephonyUnavailable => "transport",
            ClientError::RegistrationFailed { .. } => "registration",
            ClientError::NoEstablishedSession
            | ClientError::NoIncomingCall
            | ClientError::CallSetupFailed { .. }
            | ClientError::CallTerminated { .. } => "call",
            ClientError::PresentationAlreadyStarted
            | ClientError::PresentationNotStarted
            | ClientError::PresentationFailed { .. } => "presentation",
            ClientError::DecodeError { .. } => "protocol",
            ClientError::InternalError { .. } => "internal",
        }
    }

    /// Convenience constructor for transient websocket/handshake failures
    pub fn transient_transport(reason: impl Into<String>) -> Self {
        ClientError::TransportFailure {
            reason: reason.into(),
            transient: true,
        }
    }

    /// Convenience constructor for terminal transport failures
    pub fn fatal_transport(reason: impl Into<String>) -> Self {
        ClientError::TransportFailure {
            reason: reason.into(),
            transient: false,
        }
    }
}
