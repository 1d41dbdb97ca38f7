//! Impure I/O operations for the MQTT broker handle
//!
//! Every `connect` builds a fresh `rumqttc` client/event loop pair and spawns
//! a driver task that polls it. The driver reports the ConnAck back to
//! `connect`, fans inbound publishes out to message listeners, and on the
//! first error or broker DISCONNECT notifies close listeners and exits.
//! Reconnecting is left to the connection manager.
//!
//! `publish` and `subscribe` resolve only once the broker acknowledged the
//! request, bounded by the connect timeout. A session that ends first fails
//! every waiting caller.

use super::acks::{AckReceiver, PendingAcks};
use super::connection::{configure_mqtt_options, wire_qos, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::transport::listeners::{Listener, ListenerSet};
use crate::transport::{BrokerHandle, CloseReason, InboundMessage, QoS};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const MESSAGE_LISTENER_CAPACITY: usize = 256;
const SIGNAL_LISTENER_CAPACITY: usize = 8;
const DRIVER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// State shared between the handle and its driver task
struct Shared {
    active: AtomicBool,
    closing: AtomicBool,
    messages: ListenerSet<InboundMessage>,
    closes: ListenerSet<CloseReason>,
    shutdowns: ListenerSet<()>,
    acks: StdMutex<PendingAcks>,
}

impl Shared {
    fn acks(&self) -> MutexGuard<'_, PendingAcks> {
        self.acks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
struct Session {
    client: Option<AsyncClient>,
    driver: Option<JoinHandle<()>>,
}

/// Live broker handle over `rumqttc` MQTT v5
pub struct MqttBroker {
    config: MqttSection,
    shared: Arc<Shared>,
    session: Mutex<Session>,
    /// Held while a request is queued so ack bookkeeping matches request order
    request_order: Mutex<()>,
    shut_down: AtomicBool,
}

impl MqttBroker {
    pub fn new(config: MqttSection) -> Result<Self, MqttError> {
        // fail fast on a bad URL rather than on first connect
        configure_mqtt_options(&config, false)?;

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                messages: ListenerSet::new("message", MESSAGE_LISTENER_CAPACITY),
                closes: ListenerSet::new("close", SIGNAL_LISTENER_CAPACITY),
                shutdowns: ListenerSet::new("shutdown", SIGNAL_LISTENER_CAPACITY),
                acks: StdMutex::new(PendingAcks::new()),
            }),
            session: Mutex::new(Session::default()),
            request_order: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MqttSection {
        &self.config
    }

    /// Client for the live session, if any
    async fn live_client(&self) -> Result<AsyncClient, MqttError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(MqttError::HandleShutDown);
        }
        if !self.shared.active.load(Ordering::SeqCst) {
            return Err(MqttError::NotConnected);
        }
        self.session
            .lock()
            .await
            .client
            .clone()
            .ok_or(MqttError::NotConnected)
    }

    /// Wait for the broker to acknowledge a queued request
    async fn await_ack(
        &self,
        ack: AckReceiver,
        failed: fn(String) -> MqttError,
    ) -> Result<(), MqttError> {
        match tokio::time::timeout(self.config.connect_timeout(), ack).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(failed(reason)),
            Ok(Err(_)) => Err(failed("acknowledgement tracking stopped".to_string())),
            Err(_) => Err(MqttError::AckTimeout),
        }
    }

    /// Poll the event loop until the session ends
    async fn drive(
        mut event_loop: EventLoop,
        shared: Arc<Shared>,
        ack: oneshot::Sender<Result<(), String>>,
    ) {
        let mut ack = Some(ack);

        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    shared.acks().observe(&event);
                    match MessageHandler::route_mqtt_event(&event) {
                        EventRoute::ConnectionAcknowledged => {
                            shared.active.store(true, Ordering::SeqCst);
                            info!("MQTT session established");
                            if let Some(ack) = ack.take() {
                                let _ = ack.send(Ok(()));
                            }
                        }
                        EventRoute::MessageReceived(message) => {
                            trace!(topic = %message.topic, bytes = message.payload.len(), "Received MQTT message");
                            shared.messages.notify(message);
                        }
                        EventRoute::Disconnected => {
                            shared.active.store(false, Ordering::SeqCst);
                            shared.acks().fail_all("broker sent DISCONNECT");
                            warn!("Broker sent DISCONNECT");
                            if !shared.closing.load(Ordering::SeqCst) {
                                shared.closes.notify(CloseReason::DisconnectedByBroker);
                            }
                            break;
                        }
                        EventRoute::SubscriptionConfirmed { packet_id, filters } => {
                            debug!(packet_id, filters, "Subscription confirmed");
                        }
                        EventRoute::InfrastructureEvent(event) => {
                            trace!(target: "mqtt_transport", "MQTT event: {}", event);
                        }
                        EventRoute::OutgoingEvent => {}
                    }
                }
                Err(e) => {
                    shared.active.store(false, Ordering::SeqCst);
                    shared.acks().fail_all(&e.to_string());

                    // a failed handshake is reported to connect(), not as a close
                    if let Some(ack) = ack.take() {
                        let _ = ack.send(Err(e.to_string()));
                        break;
                    }

                    if shared.closing.load(Ordering::SeqCst) {
                        debug!("MQTT event loop stopped after disconnect: {}", e);
                    } else {
                        error!("MQTT event loop error: {}", e);
                        shared.closes.notify(CloseReason::NetworkError(e.to_string()));
                    }
                    break;
                }
            }
        }

        debug!("MQTT driver task exited");
    }

    /// Wait for a driver to finish, aborting it if it does not
    async fn stop_driver(mut handle: JoinHandle<()>) {
        match tokio::time::timeout(DRIVER_STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => debug!("Driver task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Driver task ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Driver task didn't shut down gracefully, forcing abort");
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl BrokerHandle for MqttBroker {
    async fn connect(&self, clean_session: bool) -> Result<(), MqttError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(MqttError::HandleShutDown);
        }

        let ack_rx = {
            let mut session = self.session.lock().await;
            if self.shared.active.load(Ordering::SeqCst) {
                return Err(MqttError::AlreadyConnected);
            }
            if let Some(stale) = session.driver.take() {
                stale.abort();
            }

            let options = configure_mqtt_options(&self.config, clean_session)?;
            let (client, event_loop) = AsyncClient::new(options, self.config.request_capacity);
            let (ack_tx, ack_rx) = oneshot::channel();

            self.shared.closing.store(false, Ordering::SeqCst);
            self.shared.acks().fail_all("session replaced");
            session.driver = Some(tokio::spawn(Self::drive(
                event_loop,
                Arc::clone(&self.shared),
                ack_tx,
            )));
            session.client = Some(client);
            ack_rx
        };

        info!(
            broker_url = %self.config.broker_url,
            client_id = %self.config.client_id,
            clean_session,
            "Connecting to MQTT broker"
        );

        let outcome = match tokio::time::timeout(self.config.connect_timeout(), ack_rx).await {
            Ok(Ok(Ok(()))) => return Ok(()),
            Ok(Ok(Err(reason))) => MqttError::connection_failed(reason),
            Ok(Err(_)) => MqttError::connection_failed("driver stopped before ConnAck"),
            Err(_) => MqttError::ConnectTimeout,
        };

        let mut session = self.session.lock().await;
        session.client = None;
        if let Some(driver) = session.driver.take() {
            driver.abort();
        }
        Err(outcome)
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.shared.closing.store(true, Ordering::SeqCst);

        let (client, driver) = {
            let mut session = self.session.lock().await;
            (session.client.take(), session.driver.take())
        };

        let result = match client {
            Some(client) if self.shared.active.load(Ordering::SeqCst) => client
                .disconnect()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e))),
            _ => Ok(()),
        };
        self.shared.active.store(false, Ordering::SeqCst);

        if let Some(driver) = driver {
            Self::stop_driver(driver).await;
        }
        self.shared.acks().fail_all("disconnected");

        info!("MQTT client disconnected");
        result
    }

    async fn shutdown(&self) -> Result<(), MqttError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.disconnect().await;
        self.shared.shutdowns.notify(());

        self.shared.messages.clear();
        self.shared.closes.clear();
        self.shared.shutdowns.clear();

        info!("MQTT broker handle shut down");
        result
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        let client = self.live_client().await?;
        let ack = {
            let _order = self.request_order.lock().await;
            let ack = self.shared.acks().queue_publish();
            if let Err(e) = client.publish(topic, wire_qos(qos), retain, payload).await {
                self.shared.acks().withdraw_publish();
                return Err(MqttError::PublishFailed(Box::new(e)));
            }
            ack
        };

        self.await_ack(ack, MqttError::publish_failed).await?;
        debug!(topic = %topic, ?qos, retain, "Published message");
        Ok(())
    }

    async fn subscribe(&self, topics: &[String], qos: QoS) -> Result<(), MqttError> {
        let client = self.live_client().await?;
        let mut acks = Vec::with_capacity(topics.len());
        {
            let _order = self.request_order.lock().await;
            for topic in topics {
                let ack = self.shared.acks().queue_subscribe();
                if let Err(e) = client.subscribe(topic.as_str(), wire_qos(qos)).await {
                    self.shared.acks().withdraw_subscribe();
                    return Err(MqttError::SubscriptionFailed(Box::new(e)));
                }
                acks.push((topic, ack));
            }
        }

        for (topic, ack) in acks {
            self.await_ack(ack, MqttError::subscription_failed).await?;
            debug!(topic = %topic, ?qos, "Subscribed");
        }
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), MqttError> {
        let client = self.live_client().await?;
        for topic in topics {
            client
                .unsubscribe(topic.as_str())
                .await
                .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;
            debug!(topic = %topic, "Unsubscribed");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn add_message_listener(&self) -> Listener<InboundMessage> {
        self.shared.messages.register()
    }

    fn add_close_listener(&self) -> Listener<CloseReason> {
        self.shared.closes.register()
    }

    fn add_shutdown_listener(&self) -> Listener<()> {
        self.shared.shutdowns.register()
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        // async disconnect is impossible here; just stop the driver
        if let Some(driver) = self.session.get_mut().driver.take() {
            driver.abort();
        }
    }
}
