//! Broker acknowledgement tracking
//!
//! `rumqttc` resolves `publish` and `subscribe` as soon as the request is
//! queued. [`PendingAcks`] pairs each queued request with the packet id the
//! event loop assigns to it, then resolves the caller when the broker
//! acknowledges: PubAck for QoS 1, PubComp for QoS 2, SubAck for
//! subscriptions. QoS 0 publishes resolve once written to the socket.
//!
//! Requests must be queued in the same order they are handed to the client.
//! The event loop reports outgoing packets in request order, so a FIFO per
//! request kind is enough to learn each packet id.

use super::message_handler::MessageHandler;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

pub type AckResult = Result<(), String>;
pub type AckReceiver = oneshot::Receiver<AckResult>;
type Waiter = oneshot::Sender<AckResult>;

#[derive(Default)]
pub struct PendingAcks {
    queued_publishes: VecDeque<Waiter>,
    /// Publish parked by the event loop until its packet id frees up
    collided: Option<(u16, Waiter)>,
    inflight_publishes: HashMap<u16, VecDeque<Waiter>>,
    queued_subscribes: VecDeque<Waiter>,
    inflight_subscribes: HashMap<u16, Waiter>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_publish(&mut self) -> AckReceiver {
        let (tx, rx) = oneshot::channel();
        self.queued_publishes.push_back(tx);
        rx
    }

    /// Forget the last queued publish; its request never reached the event loop
    pub fn withdraw_publish(&mut self) {
        self.queued_publishes.pop_back();
    }

    pub fn queue_subscribe(&mut self) -> AckReceiver {
        let (tx, rx) = oneshot::channel();
        self.queued_subscribes.push_back(tx);
        rx
    }

    pub fn withdraw_subscribe(&mut self) {
        self.queued_subscribes.pop_back();
    }

    /// Number of callers still waiting
    pub fn outstanding(&self) -> usize {
        self.queued_publishes.len()
            + usize::from(self.collided.is_some())
            + self
                .inflight_publishes
                .values()
                .map(VecDeque::len)
                .sum::<usize>()
            + self.queued_subscribes.len()
            + self.inflight_subscribes.len()
    }

    /// Advance the bookkeeping with one event loop event
    pub fn observe(&mut self, event: &Event) {
        match event {
            Event::Outgoing(Outgoing::Publish(0)) => {
                if let Some(waiter) = self.queued_publishes.pop_front() {
                    let _ = waiter.send(Ok(()));
                }
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                let waiter = match self.collided.take() {
                    Some((collided, waiter)) if collided == *pkid => Some(waiter),
                    other => {
                        self.collided = other;
                        self.queued_publishes.pop_front()
                    }
                };
                if let Some(waiter) = waiter {
                    self.inflight_publishes
                        .entry(*pkid)
                        .or_default()
                        .push_back(waiter);
                }
            }
            Event::Outgoing(Outgoing::AwaitAck(pkid)) => {
                if let Some(waiter) = self.queued_publishes.pop_front() {
                    self.collided = Some((*pkid, waiter));
                }
            }
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                if let Some(waiter) = self.queued_subscribes.pop_front() {
                    self.inflight_subscribes.insert(*pkid, waiter);
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                self.resolve_publish(ack.pkid, MessageHandler::validate_publish_ack(&ack.reason));
            }
            Event::Incoming(Packet::PubRec(rec)) => {
                // success only moves QoS 2 on to PubRel/PubComp
                if let Err(reason) = MessageHandler::validate_publish_received(&rec.reason) {
                    self.resolve_publish(rec.pkid, Err(reason));
                }
            }
            Event::Incoming(Packet::PubComp(comp)) => {
                self.resolve_publish(
                    comp.pkid,
                    MessageHandler::validate_publish_complete(&comp.reason),
                );
            }
            Event::Incoming(Packet::SubAck(suback)) => {
                if let Some(waiter) = self.inflight_subscribes.remove(&suback.pkid) {
                    let _ = waiter.send(MessageHandler::validate_subscription_success(
                        &suback.return_codes,
                    ));
                }
            }
            _ => {}
        }
    }

    /// Fail every waiting caller, e.g. when the session ends
    pub fn fail_all(&mut self, reason: &str) {
        let publishes = self
            .queued_publishes
            .drain(..)
            .chain(self.collided.take().map(|(_, waiter)| waiter))
            .chain(self.inflight_publishes.drain().flat_map(|(_, waiters)| waiters));
        let subscribes = self
            .queued_subscribes
            .drain(..)
            .chain(self.inflight_subscribes.drain().map(|(_, waiter)| waiter));

        for waiter in publishes.chain(subscribes) {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }

    fn resolve_publish(&mut self, pkid: u16, result: AckResult) {
        let Some(waiters) = self.inflight_publishes.get_mut(&pkid) else {
            return;
        };
        if let Some(waiter) = waiters.pop_front() {
            let _ = waiter.send(result);
        }
        if waiters.is_empty() {
            self.inflight_publishes.remove(&pkid);
        }
    }
}
