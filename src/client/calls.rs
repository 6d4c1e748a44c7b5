//! Call session management
//!
//! Owns the single current-call slot. Outgoing calls and answered invitations
//! share the same setup path: install the session, pump the channel's events,
//! and settle on the first confirmation or failure signal. The presentation
//! manager reads the same slot through a shared handle.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use dashmap::DashMap;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::call::{
    synthesize_remote_streams, CallDirection, CallId, CallSession, CallState, Originator,
    TerminationCause,
};
use crate::client::incoming::IncomingCallManager;
use crate::client::notify::NotificationDecoder;
use crate::error::{ClientError, ClientResult};
use crate::events::CallEvent;
use crate::media::MediaStream;
use crate::transport::{
    AnswerOptions, CallChannel, CallOptions, ChannelEvent, TransportSession,
};

/// Shared read handle over the current-call slot
pub type CallSlot = Arc<RwLock<Option<CallSession>>>;

pub struct CallManager {
    slot: CallSlot,
    bus: Arc<EventBus<CallEvent>>,
    decoder: Arc<NotificationDecoder>,
    /// Remote streams keyed by anchor track id, stable across queries
    stream_cache: DashMap<String, MediaStream>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl CallManager {
    pub fn new(
        slot: CallSlot,
        bus: Arc<EventBus<CallEvent>>,
        decoder: Arc<NotificationDecoder>,
    ) -> Self {
        Self {
            slot,
            bus,
            decoder,
            stream_cache: DashMap::new(),
            pump: StdMutex::new(None),
        }
    }

    /// Snapshot of the current call, if any
    pub async fn current_call(&self) -> Option<CallSession> {
        self.slot.read().await.clone()
    }

    pub async fn is_established(&self) -> bool {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|c| c.state == CallState::Established)
            .unwrap_or(false)
    }

    /// Place an outgoing call
    ///
    /// Any previous call is torn down quietly first. Resolves once the call
    /// is confirmed end to end; setup failures and early terminations reject
    /// with the channel's cause and originator.
    pub async fn call(
        &self,
        transport: &Arc<dyn TransportSession>,
        target: &str,
        options: CallOptions,
    ) -> ClientResult<CallSession> {
        self.teardown_previous().await;

        info!(%target, with_video = options.with_video, "placing outgoing call");
        let channel = transport.initiate_call(target, &options).await?;
        let rx = channel.subscribe();

        let session = CallSession::new(CallDirection::Outgoing, target.to_string(), channel);
        self.establish(session, rx).await
    }

    /// Answer the pending incoming invitation
    pub async fn answer(
        &self,
        incoming: &IncomingCallManager,
        options: AnswerOptions,
    ) -> ClientResult<CallSession> {
        let (channel, info) = incoming.take().await?;
        self.teardown_previous().await;

        info!(number = %info.number, "answering incoming invitation");
        let rx = channel.subscribe();
        channel.answer(&options).await?;

        let session = CallSession::new(CallDirection::Answered, info.number, channel);
        self.establish(session, rx).await
    }

    /// Hang up the current call
    ///
    /// The slot is cleared before the terminate request goes out, so the
    /// channel's own termination echo is never mistaken for a server-side
    /// hangup. Benign termination outcomes are swallowed; hanging up with no
    /// call is a no-op.
    pub async fn hang_up(&self) -> ClientResult<()> {
        let session = self.slot.write().await.take();
        self.stream_cache.clear();
        let Some(session) = session else {
            debug!("hang up with no current call");
            return Ok(());
        };

        if session.channel.is_ended() {
            debug!(call_id = %session.id, "channel already ended, skipping terminate");
            return Ok(());
        }

        info!(call_id = %session.id, "hanging up");
        match session.channel.terminate(487, TerminationCause::Canceled).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_canceled() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Clear the slot without signaling, used when the transport is gone
    pub async fn reset(&self) {
        if self.slot.write().await.take().is_some() {
            debug!("call slot reset");
        }
        self.stream_cache.clear();
    }

    /// Remote streams synthesized from the current call's receiver tracks
    pub async fn remote_streams(&self) -> ClientResult<Vec<MediaStream>> {
        let slot = self.slot.read().await;
        let session = slot.as_ref().ok_or(ClientError::NoEstablishedSession)?;
        let media = session
            .media
            .clone()
            .or_else(|| session.channel.media_connection())
            .ok_or(ClientError::NoEstablishedSession)?;

        let tracks = media.receiver_tracks();
        Ok(synthesize_remote_streams(&tracks, &self.stream_cache))
    }

    /// Install the session and wait for the confirmation/failure race
    async fn establish(
        &self,
        session: CallSession,
        mut rx: broadcast::Receiver<ChannelEvent>,
    ) -> ClientResult<CallSession> {
        let call_id = session.id;
        let channel = session.channel.clone();
        *self.slot.write().await = Some(session);
        self.spawn_pump(call_id, &channel);

        let outcome = await_confirmation(&mut rx).await;
        match outcome {
            Ok(()) => {
                let mut slot = self.slot.write().await;
                match slot.as_mut() {
                    Some(current) if current.id == call_id => {
                        current.state = CallState::Established;
                        if current.media.is_none() {
                            current.media = channel.media_connection();
                        }
                        info!(%call_id, "call established");
                        Ok(current.clone())
                    }
                    // Replaced or torn down while confirming.
                    _ => Err(ClientError::CallTerminated {
                        cause: TerminationCause::Canceled,
                        originator: Originator::Local,
                    }),
                }
            }
            Err(e) => {
                let mut slot = self.slot.write().await;
                if slot.as_ref().map(|c| c.id == call_id).unwrap_or(false) {
                    *slot = None;
                }
                warn!(%call_id, error = %e, "call setup failed");
                Err(e)
            }
        }
    }

    /// Quietly terminate a call being replaced by a new one
    async fn teardown_previous(&self) {
        let previous = self.slot.write().await.take();
        if let Some(previous) = previous {
            debug!(call_id = %previous.id, "tearing down previous call");
            if let Err(e) = previous
                .channel
                .terminate(487, TerminationCause::Canceled)
                .await
            {
                if !e.is_canceled() {
                    warn!(error = %e, "previous call teardown failed");
                }
            }
        }
        self.stream_cache.clear();
    }

    /// Per-call event pump
    ///
    /// Feeds typed info messages to the decoder, tracks the peer media
    /// connection, mirrors confirmation, and reports remote-originated
    /// terminations of the current call as `EndedFromServer`.
    fn spawn_pump(&self, call_id: CallId, channel: &Arc<dyn CallChannel>) {
        let slot = self.slot.clone();
        let bus = self.bus.clone();
        let decoder = self.decoder.clone();
        let mut rx = channel.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ChannelEvent::PeerConnectionCreated { media }) => {
                        let mut guard = slot.write().await;
                        if let Some(current) = guard.as_mut() {
                            if current.id == call_id {
                                current.media = Some(media);
                            }
                        }
                    }
                    Ok(ChannelEvent::Confirmed) => {
                        bus.emit(CallEvent::PeerConnectionConfirmed);
                    }
                    Ok(ChannelEvent::NewInfo { info }) => {
                        decoder.handle_info(&info);
                    }
                    Ok(ChannelEvent::Failed { cause, originator })
                    | Ok(ChannelEvent::Ended { cause, originator }) => {
                        let mut guard = slot.write().await;
                        let current =
                            guard.as_ref().map(|c| c.id == call_id).unwrap_or(false);
                        if current {
                            *guard = None;
                            drop(guard);
                            if originator == Originator::Remote {
                                info!(%call_id, %cause, "call ended by the server");
                                bus.emit(CallEvent::EndedFromServer { cause });
                            }
                        }
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "call event pump lagged");
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

impl Drop for CallManager {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}

/// Wait for the first confirmation or failure signal on a channel
///
/// Callers subscribe the receiver as soon as the channel handle exists,
/// before any answer goes out and before this wait begins, so a signal
/// emitted while the session was being installed is still observed.
async fn await_confirmation(rx: &mut broadcast::Receiver<ChannelEvent>) -> ClientResult<()> {
    loop {
        match rx.recv().await {
            Ok(ChannelEvent::Confirmed) => return Ok(()),
            Ok(ChannelEvent::Failed { cause, originator })
            | Ok(ChannelEvent::Ended { cause, originator }) => {
                return Err(ClientError::CallTerminated { cause, originator });
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return Err(ClientError::CallTerminated {
                    cause: TerminationCause::ConnectionError,
                    originator: Originator::Remote,
                });
            }
        }
    }
}
