//! Conference signaling client
//!
//! [`ConferenceClient`] is the facade the host application talks to. It owns
//! the transport adapter, the three event buses (connection, call, notify)
//! and the managers behind each operation group, and runs the session event
//! pump that routes raw transport events to the right manager.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sipconf_client_core::{ConferenceClient, ConnectionConfig, ConnectOptions};
//! # use sipconf_client_core::TransportAdapter;
//!
//! # async fn example(adapter: Arc<dyn TransportAdapter>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = ConferenceClient::new(adapter);
//! let config = ConnectionConfig::new("sip.example.com", "wss://sip.example.com/ws")
//!     .with_display_name("Alice")
//!     .with_credentials("alice", "secret")
//!     .with_register(true);
//!
//! client.connect(config, ConnectOptions::default()).await?;
//! client.call("conference-42", Default::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod calls;
pub mod config;
pub mod connection;
pub mod incoming;
pub mod media_sync;
pub mod notify;
pub mod presentation;
pub mod recovery;


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::call::{CallSession, Originator};
use crate::error::{ClientError, ClientResult};
use crate::events::{CallEvent, ConnectionEvent, IncomingCallInfo, NotifyEvent};
use crate::media::MediaStream;
use crate::transport::{AnswerOptions, CallOptions, TransportAdapter, TransportEvent};

pub use calls::CallManager;
pub use config::{ConnectionConfig, Credentials};
pub use connection::{ConnectOptions, ConnectionManager};
pub use incoming::IncomingCallManager;
pub use notify::{NotificationDecoder, NotifyCommand};
pub use presentation::{PresentationManager, PresentationOptions};
pub use recovery::{CancelHandle, RetryConfig};

/// Point-in-time snapshot of client activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStats {
    pub is_connected: bool,
    pub has_active_call: bool,
    pub has_pending_invitation: bool,
    pub connection_attempts: u64,
    pub total_calls: u64,
}

/// The conference signaling client facade
pub struct ConferenceClient {
    connection: Arc<ConnectionManager>,
    calls: Arc<CallManager>,
    incoming: Arc<IncomingCallManager>,
    presentation: Arc<PresentationManager>,
    decoder: Arc<NotificationDecoder>,
    connection_bus: Arc<EventBus<ConnectionEvent>>,
    call_bus: Arc<EventBus<CallEvent>>,
    notify_bus: Arc<EventBus<NotifyEvent>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
    connection_attempts: AtomicU64,
    total_calls: AtomicU64,
}

impl ConferenceClient {
    pub fn new(adapter: Arc<dyn TransportAdapter>) -> Self {
        let connection_bus = Arc::new(EventBus::new());
        let call_bus = Arc::new(EventBus::new());
        let notify_bus = Arc::new(EventBus::new());

        let slot = Arc::new(RwLock::new(None));
        let decoder = Arc::new(NotificationDecoder::new(
            notify_bus.clone(),
            call_bus.clone(),
        ));
        let connection = Arc::new(ConnectionManager::new(adapter, connection_bus.clone()));
        let incoming = Arc::new(IncomingCallManager::new(connection_bus.clone()));
        let calls = Arc::new(CallManager::new(
            slot.clone(),
            call_bus.clone(),
            decoder.clone(),
        ));
        let presentation = Arc::new(PresentationManager::new(slot, call_bus.clone()));

        Self {
            connection,
            calls,
            incoming,
            presentation,
            decoder,
            connection_bus,
            call_bus,
            notify_bus,
            pump: StdMutex::new(None),
            connection_attempts: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
        }
    }

    // ===== Connection lifecycle =====

    /// Connect (or reconnect) to the conference server
    pub async fn connect(
        &self,
        config: ConnectionConfig,
        options: ConnectOptions,
    ) -> ClientResult<()> {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
        let session = self.connection.connect(config, options).await?;
        self.spawn_pump(session.subscribe());
        Ok(())
    }

    /// Disconnect and clear all per-connection state
    pub async fn disconnect(&self) -> ClientResult<()> {
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
        self.presentation.reset();
        self.calls.reset().await;
        self.incoming.clear().await;
        self.connection.disconnect().await
    }

    /// Probe server availability with a disposable session
    pub async fn check_telephony(&self, config: ConnectionConfig) -> ClientResult<()> {
        self.connection.check_telephony(config).await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    // ===== Calls =====

    /// Place an outgoing call to a number or conference target
    ///
    /// A presentation riding on the call being replaced is stopped first, so
    /// the new call starts with a clean presentation state.
    pub async fn call(&self, target: &str, options: CallOptions) -> ClientResult<CallSession> {
        let session = self
            .connection
            .session()
            .await
            .ok_or(ClientError::TransportNotInitialized)?;
        self.teardown_presentation().await;
        let call = self.calls.call(&session, target, options).await?;
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        Ok(call)
    }

    /// Answer the pending incoming invitation
    pub async fn answer_to_incoming_call(
        &self,
        options: AnswerOptions,
    ) -> ClientResult<CallSession> {
        self.teardown_presentation().await;
        let call = self.calls.answer(&self.incoming, options).await?;
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        Ok(call)
    }

    /// Decline the pending incoming invitation
    pub async fn decline_to_incoming_call(&self) -> ClientResult<()> {
        self.incoming.decline().await
    }

    /// Decline the pending incoming invitation with a specific status code
    pub async fn decline_to_incoming_call_with_status(
        &self,
        status_code: u16,
    ) -> ClientResult<()> {
        self.incoming.decline_with_status(status_code).await
    }

    /// Refuse the pending incoming invitation busy
    pub async fn busy(&self) -> ClientResult<()> {
        self.incoming.busy().await
    }

    /// Hang up the current call
    ///
    /// The presentation is stopped first, best effort; a stop failure is
    /// logged and never blocks the hangup.
    pub async fn hang_up(&self) -> ClientResult<()> {
        if let Err(e) = self.presentation.stop().await {
            warn!(error = %e, "presentation stop during hangup failed");
        }
        self.presentation.reset();
        self.calls.hang_up().await
    }

    /// Stop and clear a presentation left over from the previous call
    async fn teardown_presentation(&self) {
        if let Err(e) = self.presentation.stop().await {
            warn!(error = %e, "presentation stop during call replacement failed");
        }
        self.presentation.reset();
    }

    pub async fn current_call(&self) -> Option<CallSession> {
        self.calls.current_call().await
    }

    pub async fn incoming_call_info(&self) -> Option<IncomingCallInfo> {
        self.incoming.pending_info().await
    }

    /// Remote streams synthesized from the current call's receiver tracks
    pub async fn remote_streams(&self) -> ClientResult<Vec<MediaStream>> {
        self.calls.remote_streams().await
    }

    // ===== Presentation =====

    /// Begin presenting the given stream on the current call
    pub async fn start_presentation(
        &self,
        stream: MediaStream,
        options: PresentationOptions,
    ) -> ClientResult<String> {
        self.presentation.start(stream, options).await
    }

    /// Stop the active presentation; idempotent
    pub async fn stop_presentation(&self) -> ClientResult<()> {
        self.presentation.stop().await
    }

    /// Swap the outgoing presentation stream without renegotiation
    pub async fn update_presentation(
        &self,
        stream: MediaStream,
        options: PresentationOptions,
    ) -> ClientResult<String> {
        self.presentation.update(stream, options).await
    }

    pub fn is_pending_presentation(&self) -> bool {
        self.presentation.is_pending_presentation()
    }

    // ===== Notifications =====

    /// One-shot await over the shared force-sync media-state channel
    pub async fn wait_sync_media_state(&self) -> bool {
        media_sync::wait_sync_media_state(&self.notify_bus).await
    }

    // ===== Event subscriptions =====

    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection_bus.subscribe()
    }

    pub fn call_events(&self) -> broadcast::Receiver<CallEvent> {
        self.call_bus.subscribe()
    }

    pub fn notify_events(&self) -> broadcast::Receiver<NotifyEvent> {
        self.notify_bus.subscribe()
    }

    /// Snapshot of current activity, recalculated from actual state
    pub async fn stats(&self) -> ClientStats {
        ClientStats {
            is_connected: self.connection.is_connected().await,
            has_active_call: self.calls.is_established().await,
            has_pending_invitation: self.incoming.has_pending().await,
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            total_calls: self.total_calls.load(Ordering::Relaxed),
        }
    }

    /// Route raw transport events to the managers
    ///
    /// Connection-state transitions after the initial connect are mirrored to
    /// the connection bus; remote invites feed the incoming-call manager;
    /// notify envelopes feed the decoder. An unexpected disconnect clears all
    /// per-connection state before the event reaches subscribers.
    fn spawn_pump(&self, mut rx: broadcast::Receiver<TransportEvent>) {
        let connection_bus = self.connection_bus.clone();
        let incoming = self.incoming.clone();
        let calls = self.calls.clone();
        let presentation = self.presentation.clone();
        let decoder = self.decoder.clone();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(TransportEvent::Disconnected) => {
                        debug!("transport disconnected, clearing per-connection state");
                        presentation.reset();
                        calls.reset().await;
                        incoming.clear().await;
                        connection_bus.emit(ConnectionEvent::Disconnected);
                    }
                    Ok(TransportEvent::Unregistered) => {
                        connection_bus.emit(ConnectionEvent::Unregistered);
                    }
                    Ok(TransportEvent::RegistrationFailed { reason }) => {
                        connection_bus.emit(ConnectionEvent::RegistrationFailed { reason });
                    }
                    Ok(TransportEvent::NewSession { channel, originator }) => {
                        if originator == Originator::Remote {
                            incoming.on_new_invitation(channel).await;
                        }
                    }
                    Ok(TransportEvent::SipEvent { header }) => {
                        decoder.handle_notify(&header);
                    }
                    // Connect-time transitions are published by the
                    // connection manager while the request resolves.
                    Ok(TransportEvent::Connecting)
                    | Ok(TransportEvent::Connected)
                    | Ok(TransportEvent::Registered) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "session event pump lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut pump = self.pump.lock().unwrap();
        if let Some(previous) = pump.replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for ConferenceClient {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}
