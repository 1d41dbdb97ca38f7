//! Connection lifecycle manager
//!
//! The manager is the only component that connects, disconnects, or shuts
//! down the broker handle. It turns the handle's close notifications into an
//! ordered, deduplicated stream of [`ConnectionEvent`]s and reconnects on its
//! own after every drop until [`ConnectionManager::shutdown`] is called.

use super::events::{ConnectionEvent, ConnectionEvents, EventEmitter, EVENT_CHANNEL_CAPACITY};
use super::reconnect::{should_attempt_reconnection, ReconnectConfig, ReconnectionDecision};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::mqtt_span;
use crate::transport::{BrokerHandle, CloseReason, Listener, MqttError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const SUPERVISOR_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns the (re)connect decision for one broker handle
pub struct ConnectionManager<B: BrokerHandle> {
    broker: Arc<B>,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    clean_session: bool,
    retry_initial_connect: bool,
    emitter: Arc<EventEmitter>,
    events: StdMutex<Option<ConnectionEvents>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
    reconnect_count: Arc<AtomicU32>,
    is_shut_down: AtomicBool,
}

impl<B: BrokerHandle> ConnectionManager<B> {
    pub fn new(broker: Arc<B>, reconnect: ReconnectConfig, connect_timeout: Duration) -> Self {
        let (emitter, events) = EventEmitter::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, _) = watch::channel(false);

        Self {
            broker,
            reconnect,
            connect_timeout,
            clean_session: false,
            retry_initial_connect: true,
            emitter: Arc::new(emitter),
            events: StdMutex::new(Some(events)),
            supervisor: Mutex::new(None),
            stop_tx,
            reconnect_count: Arc::new(AtomicU32::new(0)),
            is_shut_down: AtomicBool::new(false),
        }
    }

    /// Manager configured from the `[mqtt]` and `[reconnect]` sections
    pub fn from_config(broker: Arc<B>, config: &ControllerConfig) -> Self {
        Self::new(
            broker,
            config.reconnect.to_reconnect_config(),
            config.mqtt.connect_timeout(),
        )
        .with_clean_session(config.mqtt.clean_session)
        .with_retry_initial_connect(config.reconnect.retry_initial_connect)
    }

    /// Session flag used by [`ConnectionManager::run`]
    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn with_retry_initial_connect(mut self, retry: bool) -> Self {
        self.retry_initial_connect = retry;
        self
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Take the event stream; there is exactly one per manager
    pub fn events(&self) -> Option<ConnectionEvents> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Number of successful automatic reconnects
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::SeqCst)
    }

    /// True when the last emitted event was `Connected`
    pub fn is_connected(&self) -> bool {
        self.emitter.last() == Some(ConnectionEvent::Connected)
    }

    pub fn is_shut_down(&self) -> bool {
        self.is_shut_down.load(Ordering::SeqCst)
    }

    /// Connect once and start supervising the session
    ///
    /// On failure `Disconnected` is emitted and the error returned; the
    /// initial connect is not retried here. Once connected, every drop is
    /// followed by automatic reconnect attempts until shutdown.
    pub async fn connect(&self, clean_session: bool) -> ControllerResult<()> {
        if self.is_shut_down() {
            return Err(ControllerError::Connection(MqttError::HandleShutDown));
        }

        let mut supervisor = self.supervisor.lock().await;
        if supervisor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Connection already supervised");
            return Ok(());
        }

        // registered before connecting so an immediate drop is not missed
        let closes = self.broker.add_close_listener();
        let shutdowns = self.broker.add_shutdown_listener();

        let span = mqtt_span!(operation = "connect", clean_session);
        match connect_once(self.broker.as_ref(), clean_session, self.connect_timeout)
            .instrument(span)
            .await
        {
            Ok(()) => {
                info!("Connected to MQTT broker");
                self.emitter.emit(ConnectionEvent::Connected).await;
            }
            Err(e) => {
                warn!(error = %e, "Initial connect failed");
                self.emitter.emit(ConnectionEvent::Disconnected).await;
                return Err(ControllerError::Connection(e));
            }
        }

        let task = Supervisor {
            broker: Arc::clone(&self.broker),
            emitter: Arc::clone(&self.emitter),
            reconnect: self.reconnect.clone(),
            connect_timeout: self.connect_timeout,
            clean_session,
            stop_rx: self.stop_tx.subscribe(),
            reconnect_count: Arc::clone(&self.reconnect_count),
        };
        *supervisor = Some(tokio::spawn(task.run(closes, shutdowns)));
        Ok(())
    }

    /// Stop supervising, emit `ShuttingDown`, release the broker handle
    ///
    /// Idempotent. No events follow `ShuttingDown`.
    pub async fn shutdown(&self) {
        if self.is_shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down connection manager");

        let _ = self.stop_tx.send(true);
        if let Some(mut handle) = self.supervisor.lock().await.take() {
            if tokio::time::timeout(SUPERVISOR_STOP_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                warn!("Connection supervisor didn't stop in time, aborting");
                handle.abort();
            }
        }

        self.emitter.finish(ConnectionEvent::ShuttingDown).await;

        if let Err(e) = self.broker.disconnect().await {
            warn!(error = %e, "Disconnect during shutdown failed");
        }
        if let Err(e) = self.broker.shutdown().await {
            warn!(error = %e, "Broker handle shutdown failed");
        }
        info!("Connection manager stopped");
    }

    /// Service entry point: connect, wait for the shutdown signal, shut down
    ///
    /// When `retry_initial_connect` is set a failed first connect is retried
    /// with backoff until it succeeds or shutdown is requested.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ControllerResult<()> {
        let mut attempts = 0u32;

        loop {
            let result = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Shutdown requested before connecting");
                    self.shutdown().await;
                    return Ok(());
                }
                result = self.connect(self.clean_session) => result,
            };

            match result {
                Ok(()) => break,
                Err(e) if !self.retry_initial_connect => {
                    error!(error = %e, "Initial connect failed, not retrying");
                    self.shutdown().await;
                    return Err(e);
                }
                Err(_) => match should_attempt_reconnection(attempts, &self.reconnect, false) {
                    ReconnectionDecision::Proceed { attempt, delay_ms } => {
                        attempts = attempt;
                        info!(attempt, delay_ms, "Retrying initial connect");
                        if !interruptible_sleep(shutdown.clone(), delay_ms).await {
                            self.shutdown().await;
                            return Ok(());
                        }
                    }
                    _ => {
                        self.shutdown().await;
                        return Err(ControllerError::Connection(MqttError::connection_failed(
                            "reconnect attempts exhausted",
                        )));
                    }
                },
            }
        }

        wait_for_shutdown(&mut shutdown).await;
        self.shutdown().await;
        Ok(())
    }
}

/// Background task reacting to close notifications
struct Supervisor<B: BrokerHandle> {
    broker: Arc<B>,
    emitter: Arc<EventEmitter>,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    clean_session: bool,
    stop_rx: watch::Receiver<bool>,
    reconnect_count: Arc<AtomicU32>,
}

impl<B: BrokerHandle> Supervisor<B> {
    async fn run(mut self, mut closes: Listener<CloseReason>, mut shutdowns: Listener<()>) {
        loop {
            let reason = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.stop_rx) => break,
                _ = shutdowns.recv() => {
                    self.handle_shut_down().await;
                    break;
                }
                reason = closes.recv() => match reason {
                    Some(reason) => reason,
                    None => {
                        debug!("Close notifications ended");
                        self.handle_shut_down().await;
                        break;
                    }
                },
            };

            warn!(%reason, "Connection to broker lost");
            self.emitter.emit(ConnectionEvent::Disconnected).await;

            if !self.reconnect_until_connected().await {
                break;
            }
        }
        debug!("Connection supervisor stopped");
    }

    /// The broker handle was shut down behind the manager's back
    ///
    /// Nothing can reconnect an inert handle, so the event stream ends here.
    async fn handle_shut_down(&self) {
        if *self.stop_rx.borrow() {
            return;
        }
        warn!("Broker handle shut down outside the connection manager");
        self.emitter.finish(ConnectionEvent::ShuttingDown).await;
    }

    /// Returns false when shutdown interrupted the attempts
    async fn reconnect_until_connected(&self) -> bool {
        let mut attempts = 0u32;
        loop {
            let shutdown_requested = *self.stop_rx.borrow();
            match should_attempt_reconnection(attempts, &self.reconnect, shutdown_requested) {
                ReconnectionDecision::Proceed { attempt, delay_ms } => {
                    attempts = attempt;
                    info!(attempt, delay_ms, "Attempting reconnection");

                    if !interruptible_sleep(self.stop_rx.clone(), delay_ms).await {
                        return false;
                    }

                    match connect_once(self.broker.as_ref(), self.clean_session, self.connect_timeout)
                        .await
                    {
                        Ok(()) => {
                            self.reconnect_count.fetch_add(1, Ordering::SeqCst);
                            info!(attempt, "Reconnected to MQTT broker");
                            self.emitter.emit(ConnectionEvent::Connected).await;
                            return true;
                        }
                        Err(MqttError::HandleShutDown) => {
                            self.handle_shut_down().await;
                            return false;
                        }
                        Err(e) => warn!(attempt, error = %e, "Reconnection attempt failed"),
                    }
                }
                ReconnectionDecision::AbortShutdownRequested => {
                    info!("Shutdown signal received, stopping reconnection");
                    return false;
                }
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    error!(attempts, "Max reconnection attempts exceeded");
                    return false;
                }
            }
        }
    }
}

/// One bounded connect call; an already live session counts as success
async fn connect_once<B: BrokerHandle + ?Sized>(
    broker: &B,
    clean_session: bool,
    timeout: Duration,
) -> Result<(), MqttError> {
    match tokio::time::timeout(timeout, broker.connect(clean_session)).await {
        Ok(Ok(())) | Ok(Err(MqttError::AlreadyConnected)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(MqttError::ConnectTimeout),
    }
}

/// Resolve once the flag is set or the sender is gone
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        _ = wait_for_shutdown(&mut shutdown_rx) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, rx) = watch::channel(false);
        assert!(interruptible_sleep(rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(true);
        });
        assert!(!interruptible_sleep(rx, 5_000).await);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_returns_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .unwrap();
    }
}
