//! Incoming invitation handling
//!
//! At most one remote invitation is pending at a time. The slot holds the
//! unanswered channel together with the caller metadata captured at arrival,
//! so the metadata survives even after the slot is cleared. A watcher task
//! reports invitations that die before the application consumes them.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::call::{Originator, TerminationCause};
use crate::error::{ClientError, ClientResult};
use crate::events::{ConnectionEvent, IncomingCallInfo};
use crate::transport::{CallChannel, ChannelEvent};

struct PendingInvitation {
    channel: Arc<dyn CallChannel>,
    info: IncomingCallInfo,
}

pub struct IncomingCallManager {
    pending: Arc<RwLock<Option<PendingInvitation>>>,
    bus: Arc<EventBus<ConnectionEvent>>,
}

impl IncomingCallManager {
    pub fn new(bus: Arc<EventBus<ConnectionEvent>>) -> Self {
        Self {
            pending: Arc::new(RwLock::new(None)),
            bus,
        }
    }

    /// Caller metadata of the pending invitation, if any
    pub async fn pending_info(&self) -> Option<IncomingCallInfo> {
        self.pending.read().await.as_ref().map(|p| p.info.clone())
    }

    pub async fn has_pending(&self) -> bool {
        self.pending.read().await.is_some()
    }

    /// Admit a remote invitation into the slot
    ///
    /// A newer invitation replaces a pending one; the superseded channel is
    /// refused busy best-effort. The caller metadata is captured at arrival,
    /// the application is notified and a watcher starts reporting an
    /// invitation that dies unconsumed.
    pub async fn on_new_invitation(&self, channel: Arc<dyn CallChannel>) {
        let mut slot = self.pending.write().await;
        if let Some(superseded) = slot.take() {
            warn!(number = %superseded.info.number, "invitation superseded by a newer one");
            if let Err(e) = superseded.channel.terminate(486, TerminationCause::Busy).await {
                warn!(error = %e, "failed to refuse superseded invitation");
            }
        }

        let identity = channel.remote_identity();
        let info = IncomingCallInfo {
            display_name: identity.display_name,
            host: identity.host,
            number: identity.number,
            received_at: Utc::now(),
        };
        info!(number = %info.number, "incoming invitation");

        let rx = channel.subscribe();
        *slot = Some(PendingInvitation {
            channel: channel.clone(),
            info: info.clone(),
        });
        drop(slot);

        self.spawn_watcher(channel, rx);
        self.bus.emit(ConnectionEvent::IncomingCall { info });
    }

    /// Consume the pending invitation for answering
    ///
    /// The call manager owns the answer sequence; this only hands over the
    /// channel and clears the slot so the watcher stands down.
    pub async fn take(&self) -> ClientResult<(Arc<dyn CallChannel>, IncomingCallInfo)> {
        let pending = self
            .pending
            .write()
            .await
            .take()
            .ok_or(ClientError::NoIncomingCall)?;
        Ok((pending.channel, pending.info))
    }

    /// Decline the pending invitation
    pub async fn decline(&self) -> ClientResult<()> {
        self.decline_with_status(487).await
    }

    /// Decline the pending invitation with a caller-supplied status code
    pub async fn decline_with_status(&self, status_code: u16) -> ClientResult<()> {
        self.refuse(status_code, TerminationCause::Rejected).await
    }

    /// Refuse the pending invitation busy
    pub async fn busy(&self) -> ClientResult<()> {
        self.refuse(486, TerminationCause::Busy).await
    }

    async fn refuse(&self, status_code: u16, cause: TerminationCause) -> ClientResult<()> {
        let pending = self
            .pending
            .write()
            .await
            .take()
            .ok_or(ClientError::NoIncomingCall)?;

        info!(number = %pending.info.number, status_code, "refusing incoming invitation");
        // Published from the metadata captured at arrival, before the
        // terminate request goes out: the slot is already cleared, so
        // observers learn about the decline even when the signal fails.
        self.bus.emit(ConnectionEvent::DeclinedIncomingCall {
            info: pending.info.clone(),
        });
        pending.channel.terminate(status_code, cause).await
    }

    /// Drop the pending invitation silently, if any
    ///
    /// Used on disconnect; no decline is sent because the transport is going
    /// away anyway.
    pub async fn clear(&self) {
        if self.pending.write().await.take().is_some() {
            debug!("pending invitation dropped with the transport");
        }
    }

    /// Report an invitation that terminates before being consumed
    ///
    /// A locally originated teardown surfaces as `TerminatedIncomingCall`, a
    /// remote one as `FailedIncomingCall`. Nothing is reported when the slot
    /// no longer holds this channel: the invitation was answered or declined
    /// first.
    fn spawn_watcher(
        &self,
        channel: Arc<dyn CallChannel>,
        mut rx: broadcast::Receiver<ChannelEvent>,
    ) {
        let pending = self.pending.clone();
        let bus = self.bus.clone();

        tokio::spawn(async move {
            let originator = loop {
                match rx.recv().await {
                    Ok(ChannelEvent::Failed { originator, .. })
                    | Ok(ChannelEvent::Ended { originator, .. }) => break originator,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            };

            let mut slot = pending.write().await;
            let consumed = match slot.as_ref() {
                Some(p) => !Arc::ptr_eq(&p.channel, &channel),
                None => true,
            };
            if consumed {
                return;
            }
            let info = match slot.take() {
                Some(p) => p.info,
                None => return,
            };
            drop(slot);

            debug!(number = %info.number, %originator, "pending invitation died unconsumed");
            match originator {
                Originator::Local => {
                    bus.emit(ConnectionEvent::TerminatedIncomingCall { info });
                }
                Originator::Remote => {
                    bus.emit(ConnectionEvent::FailedIncomingCall { info });
                }
            }
        });
    }
}
