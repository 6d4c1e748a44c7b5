//! Connection lifecycle manager
//!
//! Owns the transport session slot, coalesces overlapping connect requests,
//! retries transient failures against a bounded budget and re-checks the
//! live configuration against the requested one before declaring success.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::client::config::ConnectionConfig;
use crate::client::recovery::{retry_with_backoff, CancelHandle, RetryConfig};
use crate::error::{ClientError, ClientResult};
use crate::events::ConnectionEvent;
use crate::transport::{TransportAdapter, TransportEvent, TransportSession};

/// Per-request connect options
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Retry budget: total attempts per connect request
    pub call_limit: u32,
    /// Backoff schedule used between attempts
    pub retry: RetryConfig,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            call_limit: 3,
            retry: RetryConfig::slow(),
        }
    }
}

pub struct ConnectionManager {
    adapter: Arc<dyn TransportAdapter>,
    session: RwLock<Option<Arc<dyn TransportSession>>>,
    /// Cancel handle of the in-flight connect request's retry loop
    connect_cancel: StdMutex<Option<CancelHandle>>,
    bus: Arc<EventBus<ConnectionEvent>>,
}

impl ConnectionManager {
    pub fn new(adapter: Arc<dyn TransportAdapter>, bus: Arc<EventBus<ConnectionEvent>>) -> Self {
        Self {
            adapter,
            session: RwLock::new(None),
            connect_cancel: StdMutex::new(None),
            bus,
        }
    }

    /// The live transport session, if any
    pub async fn session(&self) -> Option<Arc<dyn TransportSession>> {
        self.session.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.is_connected())
            .unwrap_or(false)
    }

    /// Establish (or re-establish) the transport session
    ///
    /// Overlapping requests are coalesced: a new request cancels the previous
    /// request's retry scheduling before starting its own attempt sequence.
    /// An attempt already in flight is never aborted; its result is discarded
    /// by the structural completion check. A request whose configuration is
    /// already satisfied by the connected transport resolves without a second
    /// physical attempt.
    pub async fn connect(
        &self,
        config: ConnectionConfig,
        options: ConnectOptions,
    ) -> ClientResult<Arc<dyn TransportSession>> {
        config.validate()?;

        if let Some(existing) = self.satisfied_by_current(&config).await {
            debug!("connect request already satisfied by the live transport");
            return Ok(existing);
        }

        let cancel = self.supersede_pending();
        self.bus.emit(ConnectionEvent::Connecting);

        let retry = options.retry.with_max_attempts(options.call_limit.max(1));
        let result = retry_with_backoff("connect", retry, &cancel, || {
            self.attempt_connect(&config)
        })
        .await;

        match result {
            Ok(session) => {
                *self.session.write().await = Some(session.clone());
                self.bus.emit(ConnectionEvent::Connected);
                if config.register {
                    self.bus.emit(ConnectionEvent::Registered);
                }
                info!(server = %config.server_url, "transport connected");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "connect request failed");
                Err(e)
            }
        }
    }

    /// Tear down the transport session
    ///
    /// Resolves once the terminal disconnected signal is observed. When no
    /// session exists the signal is synthesized so callers can always await
    /// a clean disconnect.
    pub async fn disconnect(&self) -> ClientResult<()> {
        if let Some(cancel) = self.connect_cancel.lock().unwrap().take() {
            cancel.cancel();
        }

        let session = self.session.write().await.take();
        match session {
            Some(session) => {
                let mut rx = session.subscribe();
                if session.live_config().register {
                    // The registration is released before the socket closes.
                    if let Err(e) = session.unregister().await {
                        warn!(error = %e, "unregister on disconnect failed");
                    }
                }
                session.stop().await?;
                wait_for_disconnected(&mut rx).await;
                self.bus.emit(ConnectionEvent::Disconnected);
                info!("transport disconnected");
                Ok(())
            }
            None => {
                // Nothing to stop; synthesize the terminal signal.
                self.bus.emit(ConnectionEvent::Disconnected);
                Ok(())
            }
        }
    }

    /// Probe server availability with a disposable session
    ///
    /// Resolves if the probe reaches connected and then stops cleanly;
    /// rejects with [`ClientError::TelephonyUnavailable`] if it disconnects
    /// before connecting.
    pub async fn check_telephony(&self, config: ConnectionConfig) -> ClientResult<()> {
        config.validate()?;

        let probe = self
            .adapter
            .start(&config)
            .await
            .map_err(|_| ClientError::TelephonyUnavailable)?;

        if !probe.is_connected() {
            let mut rx = probe.subscribe();
            loop {
                match rx.recv().await {
                    Ok(TransportEvent::Connected) => break,
                    Ok(TransportEvent::Disconnected) => {
                        return Err(ClientError::TelephonyUnavailable);
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ClientError::TelephonyUnavailable);
                    }
                }
            }
        }

        probe.stop().await?;
        Ok(())
    }

    async fn satisfied_by_current(
        &self,
        config: &ConnectionConfig,
    ) -> Option<Arc<dyn TransportSession>> {
        let session = self.session.read().await.clone()?;
        (session.is_connected() && config.is_same_connection(&session.live_config()))
            .then_some(session)
    }

    /// Cancel the previous request's retry loop and install a fresh handle
    fn supersede_pending(&self) -> CancelHandle {
        let mut slot = self.connect_cancel.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        let cancel = CancelHandle::new();
        *slot = Some(cancel.clone());
        cancel
    }

    /// One physical connect attempt
    async fn attempt_connect(
        &self,
        config: &ConnectionConfig,
    ) -> ClientResult<Arc<dyn TransportSession>> {
        let session = self.adapter.start(config).await?;

        if !session.is_connected() {
            let mut rx = session.subscribe();
            // Re-check after subscribing; the transport may have connected
            // between start() resolving and the subscription.
            if !session.is_connected() {
                wait_for_connected(&mut rx).await?;
            }
        }

        // The attempt only completes successfully if the transport is still
        // connected with exactly the configuration this request asked for.
        // A stale attempt superseded by a newer configuration fails here.
        if !session.is_connected() || !config.is_same_connection(&session.live_config()) {
            return Err(ClientError::fatal_transport(
                "live configuration does not match the requested one",
            ));
        }

        if config.register {
            session.register().await?;
        }

        Ok(session)
    }
}

async fn wait_for_connected(rx: &mut broadcast::Receiver<TransportEvent>) -> ClientResult<()> {
    loop {
        match rx.recv().await {
            Ok(TransportEvent::Connected) => return Ok(()),
            Ok(TransportEvent::Disconnected) => {
                return Err(ClientError::transient_transport(
                    "websocket closed during opening handshake",
                ));
            }
            Ok(TransportEvent::RegistrationFailed { reason }) => {
                return Err(ClientError::RegistrationFailed { reason });
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return Err(ClientError::fatal_transport("transport event feed closed"));
            }
        }
    }
}

async fn wait_for_disconnected(rx: &mut broadcast::Receiver<TransportEvent>) {
    loop {
        match rx.recv().await {
            Ok(TransportEvent::Disconnected) => return,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            // A closed feed means the transport is gone; treat as terminal.
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
