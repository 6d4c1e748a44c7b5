//! Transport adapter seam
//!
//! The SIP-over-WebSocket stack is an external collaborator supplied by the
//! host application. This module pins down the exact surface the client
//! consumes: a factory ([`TransportAdapter`]), a live session
//! ([`TransportSession`]) and a per-call signaling channel ([`CallChannel`]),
//! each with a broadcast event feed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::call::{Originator, TerminationCause};
use crate::client::config::ConnectionConfig;
use crate::error::ClientResult;
use crate::media::MediaConnection;

/// Options for an outgoing invite
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub with_video: bool,
    pub extra_headers: Vec<(String, String)>,
}

/// Options for answering an incoming invitation
#[derive(Debug, Clone, Default)]
pub struct AnswerOptions {
    pub with_video: bool,
    pub extra_headers: Vec<(String, String)>,
}

/// Caller identity attached to an incoming invitation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub display_name: Option<String>,
    pub host: String,
    pub number: String,
}

/// A typed SIP INFO message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoMessage {
    pub content_type: String,
    pub headers: HashMap<String, String>,
}

impl InfoMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Raw signaling events emitted by a transport session
#[derive(Clone)]
pub enum TransportEvent {
    Connecting,
    Connected,
    Disconnected,
    Registered,
    Unregistered,
    RegistrationFailed { reason: String },
    /// A remote invite arrived; the channel is not yet answered
    NewSession {
        channel: Arc<dyn CallChannel>,
        originator: Originator,
    },
    /// Generic notify envelope: the raw JSON value of the notify header
    SipEvent { header: String },
}

/// Events emitted by one call channel
#[derive(Clone)]
pub enum ChannelEvent {
    /// The peer media connection exists; renegotiation re-emits this
    PeerConnectionCreated { media: Arc<dyn MediaConnection> },
    /// The call is confirmed end to end
    Confirmed,
    /// Setup failed before confirmation
    Failed {
        cause: TerminationCause,
        originator: Originator,
    },
    /// The call ended after (or instead of) confirmation
    Ended {
        cause: TerminationCause,
        originator: Originator,
    },
    /// A typed INFO message arrived on this call
    NewInfo { info: InfoMessage },
}

/// Factory for transport sessions, supplied by the host application
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Begin a transport session for the given configuration
    ///
    /// Resolves once the session object exists; the connected/disconnected
    /// outcome is delivered on the session's event feed. Socket construction
    /// failures reject here, classified transient for websocket-opening
    /// handshake errors.
    async fn start(&self, config: &ConnectionConfig) -> ClientResult<Arc<dyn TransportSession>>;
}

/// A live transport session
#[async_trait]
pub trait TransportSession: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Configuration the transport is actually running with, compared
    /// structurally against the requested one by the connection manager
    fn live_config(&self) -> ConnectionConfig;

    async fn register(&self) -> ClientResult<()>;

    async fn unregister(&self) -> ClientResult<()>;

    /// Send an outgoing invite, returning the call channel
    async fn initiate_call(
        &self,
        target: &str,
        options: &CallOptions,
    ) -> ClientResult<Arc<dyn CallChannel>>;

    /// Request a stop; the terminal `Disconnected` event follows on the feed
    async fn stop(&self) -> ClientResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Signaling channel for one call
#[async_trait]
pub trait CallChannel: Send + Sync {
    async fn answer(&self, options: &AnswerOptions) -> ClientResult<()>;

    async fn terminate(&self, status_code: u16, cause: TerminationCause) -> ClientResult<()>;

    async fn send_info(
        &self,
        content_type: &str,
        body: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> ClientResult<()>;

    /// Peer media connection, once created
    fn media_connection(&self) -> Option<Arc<dyn MediaConnection>>;

    fn remote_identity(&self) -> RemoteIdentity;

    fn is_ended(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
}
