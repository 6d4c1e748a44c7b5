//! # sipconf-client-core
//!
//! Signaling-session client for SIP-based video conferences. It sits between
//! a host application and two collaborators the host supplies: a
//! SIP-over-WebSocket transport stack ([`TransportAdapter`]) and a browser
//! media engine ([`MediaConnection`]). The crate owns the connection
//! lifecycle, the single call session, the presentation (screen-share)
//! sub-state machine and the decoding of the conference server's
//! notification protocol.
//!
//! ## Architecture
//!
//! - [`ConferenceClient`] is the facade; one instance per signing-in user.
//! - Three typed event buses fan out to the application: connection events
//!   ([`ConnectionEvent`]), call events ([`CallEvent`]) and decoded server
//!   notifications ([`NotifyEvent`]).
//! - Connect requests are coalesced and retried with bounded backoff;
//!   cancellation stops retry scheduling, never an attempt in flight.
//! - At most one call and at most one outgoing presentation exist at a time;
//!   a stop always chains behind a pending start.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sipconf_client_core::{
//!     ConferenceClient, ConnectionConfig, ConnectOptions, TransportAdapter,
//! };
//!
//! # async fn run(adapter: Arc<dyn TransportAdapter>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = ConferenceClient::new(adapter);
//!
//! let mut events = client.connection_events();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("connection event: {:?}", event);
//!     }
//! });
//!
//! let config = ConnectionConfig::new("sip.example.com", "wss://sip.example.com/ws")
//!     .with_display_name("Alice")
//!     .with_credentials("alice", "secret")
//!     .with_register(true);
//! client.connect(config, ConnectOptions::default()).await?;
//!
//! client.call("conference-42", Default::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod call;
pub mod client;
pub mod error;
pub mod events;
pub mod media;
pub mod transport;

pub use bus::EventBus;
pub use call::{
    is_canceled_termination, CallDirection, CallId, CallSession, CallState, Originator,
    TerminationCause,
};
pub use client::{
    CallManager, CancelHandle, ClientStats, ConferenceClient, ConnectOptions, ConnectionConfig,
    ConnectionManager, Credentials, IncomingCallManager, NotificationDecoder, NotifyCommand,
    PresentationManager, PresentationOptions, RetryConfig,
};
pub use error::{ClientError, ClientResult};
pub use events::{
    CallEvent, ConnectionEvent, EventPriority, IncomingCallInfo, LicenseType, NotifyEvent,
    ParticipantRole,
};
pub use media::{MediaConnection, MediaStream, MediaTrack, TrackKind};
pub use transport::{
    AnswerOptions, CallChannel, CallOptions, ChannelEvent, InfoMessage, RemoteIdentity,
    TransportAdapter, TransportEvent, TransportSession,
};
