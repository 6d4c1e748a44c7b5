//! Presentation (screen-share) sub-state machine
//!
//! Start, stop and update operate on one active presentation stream per call.
//! A start in flight is held in a shared pending gate: stop and update chain
//! behind it instead of racing it, and a second start while the gate is
//! occupied is refused as already started. Stopping is idempotent and always
//! leaves the state cleared, even when the call died underneath it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::call::CallState;
use crate::client::calls::CallSlot;
use crate::client::notify::{
    CONTENT_TYPE_SHARE_STATE, HEADER_SHARE_STATE, SHARE_STATE_LET_ME_START,
    SHARE_STATE_MUST_STOP_PRESENTATION, SHARE_STATE_STOP,
};
use crate::client::recovery::{retry_with_backoff, CancelHandle, RetryConfig};
use crate::error::{ClientError, ClientResult};
use crate::events::CallEvent;
use crate::media::{MediaConnection, MediaStream};
use crate::transport::CallChannel;

type PendingStart = Shared<BoxFuture<'static, Result<String, ClientError>>>;

/// Options for starting or updating a presentation
#[derive(Debug, Clone)]
pub struct PresentationOptions {
    /// Send a fire-and-forget must-stop signal to the peer first, for
    /// peer-to-peer calls where the other side may already be presenting
    pub is_p2p: bool,
    /// Cap on the outgoing presentation sender, in kbit/s
    pub bitrate_kbps: Option<u32>,
    /// Attempt budget while the stream is not yet visible; 1 means no
    /// automatic retry
    pub max_attempts: u32,
}

impl Default for PresentationOptions {
    fn default() -> Self {
        Self {
            is_p2p: false,
            bitrate_kbps: None,
            max_attempts: 1,
        }
    }
}

pub struct PresentationManager {
    slot: CallSlot,
    bus: Arc<EventBus<CallEvent>>,
    /// The live presentation stream, if any
    active: Arc<StdMutex<Option<MediaStream>>>,
    /// Gate shared by everyone awaiting an in-flight start
    pending: Arc<StdMutex<Option<PendingStart>>>,
    retry_cancel: StdMutex<Option<CancelHandle>>,
    stopping: AtomicBool,
}

impl PresentationManager {
    pub fn new(slot: CallSlot, bus: Arc<EventBus<CallEvent>>) -> Self {
        Self {
            slot,
            bus,
            active: Arc::new(StdMutex::new(None)),
            pending: Arc::new(StdMutex::new(None)),
            retry_cancel: StdMutex::new(None),
            stopping: AtomicBool::new(false),
        }
    }

    /// Whether a start or stop sequence is currently outstanding
    pub fn is_pending_presentation(&self) -> bool {
        self.pending.lock().unwrap().is_some() || self.stopping.load(Ordering::SeqCst)
    }

    /// The live presentation stream, if any
    pub fn active_stream(&self) -> Option<MediaStream> {
        self.active.lock().unwrap().clone()
    }

    /// Begin presenting the given stream
    ///
    /// Resolves with the stream id once the sequence (begin signal, media
    /// start, bitrate cap) completes. A failure clears the state, publishes
    /// `PresentationFailed` and rejects.
    pub async fn start(
        &self,
        stream: MediaStream,
        options: PresentationOptions,
    ) -> ClientResult<String> {
        let (channel, media) = self.established_call().await?;
        let stream_id = stream.id.clone();

        // The already-started check and the gate install share one critical
        // section, so two concurrent starts cannot both pass the check.
        let gate = {
            let active = self.active.lock().unwrap();
            let mut pending = self.pending.lock().unwrap();
            if active.is_some() || pending.is_some() {
                return Err(ClientError::PresentationAlreadyStarted);
            }

            let cancel = CancelHandle::new();
            *self.retry_cancel.lock().unwrap() = Some(cancel.clone());

            info!(%stream_id, "starting presentation");
            self.bus.emit(CallEvent::PresentationStart);

            let gate = start_sequence(
                channel,
                media,
                stream,
                options,
                cancel,
                self.bus.clone(),
                self.active.clone(),
                self.pending.clone(),
            )
            .boxed()
            .shared();
            *pending = Some(gate.clone());
            gate
        };

        // Drive the sequence even if the caller drops its future.
        tokio::spawn(gate.clone());
        gate.await
    }

    /// Stop the active presentation
    ///
    /// Chains behind a pending start, signals the peer and stops the media
    /// sender when the call is still alive, and synthesizes the ended event
    /// when it is not. Stopping with nothing active is a no-op.
    pub async fn stop(&self) -> ClientResult<()> {
        let pending = self.pending.lock().unwrap().clone();
        if let Some(gate) = pending {
            // Outcome irrelevant; only the ordering matters.
            let _ = gate.await;
        }

        self.stopping.store(true, Ordering::SeqCst);
        let result = self.stop_inner().await;
        self.stopping.store(false, Ordering::SeqCst);
        result
    }

    async fn stop_inner(&self) -> ClientResult<()> {
        if let Some(cancel) = self.retry_cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        let stream = self.active.lock().unwrap().take();
        let Some(stream) = stream else {
            debug!("stop with no active presentation");
            return Ok(());
        };

        let call = self.slot.read().await.clone();
        match call {
            Some(call) if call.state != CallState::Ended => {
                self.bus.emit(CallEvent::PresentationEnd);
                if let Err(e) = call
                    .channel
                    .send_info(
                        CONTENT_TYPE_SHARE_STATE,
                        None,
                        &[(HEADER_SHARE_STATE.to_string(), SHARE_STATE_STOP.to_string())],
                    )
                    .await
                {
                    warn!(error = %e, "end-presentation signal failed");
                }
                if let Some(media) = call.media.clone().or_else(|| call.channel.media_connection())
                {
                    media.stop_presentation(&stream).await?;
                }
                info!(stream_id = %stream.id, "presentation stopped");
                self.bus
                    .emit(CallEvent::PresentationEnded { stream_id: stream.id });
                Ok(())
            }
            _ => {
                // The call died underneath the presentation; nothing left to
                // signal, but observers still get the terminal event.
                debug!(stream_id = %stream.id, "synthesizing presentation end, call is gone");
                self.bus
                    .emit(CallEvent::PresentationEnded { stream_id: stream.id });
                Ok(())
            }
        }
    }

    /// Swap the outgoing presentation stream without renegotiation
    pub async fn update(
        &self,
        stream: MediaStream,
        options: PresentationOptions,
    ) -> ClientResult<String> {
        let (_channel, media) = self.established_call().await?;

        let pending = self.pending.lock().unwrap().clone();
        if let Some(gate) = pending {
            gate.await?;
        }

        if self.active.lock().unwrap().is_none() {
            return Err(ClientError::PresentationNotStarted);
        }

        info!(stream_id = %stream.id, "updating presentation");
        let sequence = async {
            media.replace_presentation_track(&stream).await?;
            if let Some(kbps) = options.bitrate_kbps {
                media.set_outgoing_bitrate_cap(kbps).await?;
            }
            Ok::<(), ClientError>(())
        };

        match sequence.await {
            Ok(()) => {
                let stream_id = stream.id.clone();
                *self.active.lock().unwrap() = Some(stream);
                self.bus
                    .emit(CallEvent::PresentationStarted { stream_id: stream_id.clone() });
                Ok(stream_id)
            }
            Err(e) => {
                // Same contract as a failed start: nothing stays active.
                *self.active.lock().unwrap() = None;
                let reason = e.to_string();
                warn!(error = %e, "presentation update failed");
                self.bus
                    .emit(CallEvent::PresentationFailed { reason: reason.clone() });
                Err(ClientError::PresentationFailed { reason })
            }
        }
    }

    /// Clear all presentation state without signaling
    pub fn reset(&self) {
        if let Some(cancel) = self.retry_cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        *self.pending.lock().unwrap() = None;
        if self.active.lock().unwrap().take().is_some() {
            debug!("presentation state reset");
        }
    }

    async fn established_call(
        &self,
    ) -> ClientResult<(Arc<dyn CallChannel>, Arc<dyn MediaConnection>)> {
        let slot = self.slot.read().await;
        let call = slot.as_ref().ok_or(ClientError::NoEstablishedSession)?;
        if call.state != CallState::Established {
            return Err(ClientError::NoEstablishedSession);
        }
        let media = call
            .media
            .clone()
            .or_else(|| call.channel.media_connection())
            .ok_or(ClientError::NoEstablishedSession)?;
        Ok((call.channel.clone(), media))
    }
}

/// The full start sequence, run behind the shared pending gate
#[allow(clippy::too_many_arguments)]
async fn start_sequence(
    channel: Arc<dyn CallChannel>,
    media: Arc<dyn MediaConnection>,
    stream: MediaStream,
    options: PresentationOptions,
    cancel: CancelHandle,
    bus: Arc<EventBus<CallEvent>>,
    active: Arc<StdMutex<Option<MediaStream>>>,
    pending: Arc<StdMutex<Option<PendingStart>>>,
) -> Result<String, ClientError> {
    if options.is_p2p {
        // Fire and forget: the peer may be presenting already.
        if let Err(e) = channel
            .send_info(
                CONTENT_TYPE_SHARE_STATE,
                None,
                &[(
                    HEADER_SHARE_STATE.to_string(),
                    SHARE_STATE_MUST_STOP_PRESENTATION.to_string(),
                )],
            )
            .await
        {
            warn!(error = %e, "peer must-stop pre-signal failed");
        }
    }

    let retry = RetryConfig::quick().with_max_attempts(options.max_attempts.max(1));
    let attempt_result = retry_with_backoff("start_presentation", retry, &cancel, || {
        let channel = channel.clone();
        let media = media.clone();
        let stream = stream.clone();
        let bitrate_kbps = options.bitrate_kbps;
        async move {
            channel
                .send_info(
                    CONTENT_TYPE_SHARE_STATE,
                    None,
                    &[(
                        HEADER_SHARE_STATE.to_string(),
                        SHARE_STATE_LET_ME_START.to_string(),
                    )],
                )
                .await?;
            media.start_presentation(&stream).await?;
            if let Some(kbps) = bitrate_kbps {
                media.set_outgoing_bitrate_cap(kbps).await?;
            }
            Ok(())
        }
    })
    .await;

    match attempt_result {
        Ok(()) => {
            let stream_id = stream.id.clone();
            *active.lock().unwrap() = Some(stream);
            *pending.lock().unwrap() = None;
            info!(%stream_id, "presentation started");
            bus.emit(CallEvent::PresentationStarted { stream_id: stream_id.clone() });
            Ok(stream_id)
        }
        Err(e) => {
            *active.lock().unwrap() = None;
            *pending.lock().unwrap() = None;
            let reason = e.to_string();
            warn!(error = %e, "presentation start failed");
            bus.emit(CallEvent::PresentationFailed { reason: reason.clone() });
            Err(ClientError::PresentationFailed { reason })
        }
    }
}
