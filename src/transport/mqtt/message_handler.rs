//! Pure routing of `rumqttc` events
//!
//! The driver in [`super::client`] reduces every event loop event to an
//! [`EventRoute`] and acts on that, keeping the I/O side free of packet
//! matching.

use crate::transport::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{
    Packet, PubAckReason, PubCompReason, PubRecReason, SubscribeReasonCode,
};
use rumqttc::v5::Event;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                }),
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    filters: suback.return_codes.len(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(
        return_codes: &[SubscribeReasonCode],
    ) -> Result<(), String> {
        let accepted = !return_codes.is_empty()
            && return_codes
                .iter()
                .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
        if accepted {
            Ok(())
        } else {
            Err(format!(
                "Subscription failed with return codes: {return_codes:?}"
            ))
        }
    }

    /// Validate a QoS 1 PubAck
    pub fn validate_publish_ack(reason: &PubAckReason) -> Result<(), String> {
        match reason {
            PubAckReason::Success | PubAckReason::NoMatchingSubscribers => Ok(()),
            other => Err(format!("Broker rejected publish: {other:?}")),
        }
    }

    /// Validate the PubRec of a QoS 2 publish
    pub fn validate_publish_received(reason: &PubRecReason) -> Result<(), String> {
        match reason {
            PubRecReason::Success | PubRecReason::NoMatchingSubscribers => Ok(()),
            other => Err(format!("Broker rejected publish: {other:?}")),
        }
    }

    /// Validate the PubComp that completes a QoS 2 publish
    pub fn validate_publish_complete(reason: &PubCompReason) -> Result<(), String> {
        match reason {
            PubCompReason::Success => Ok(()),
            other => Err(format!("Publish not completed: {other:?}")),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived(InboundMessage),
    /// Broker sent DISCONNECT
    Disconnected,
    /// Subscription confirmed for a number of filters
    SubscriptionConfirmed { packet_id: u16, filters: usize },
    /// Infrastructure event (PingResp, PubAck, ...)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish,
    };
    use rumqttc::v5::mqttbytes::QoS;

    fn publish(topic: &'static str, payload: &'static str, retain: bool) -> Event {
        Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain,
            topic: Bytes::from(topic),
            pkid: 1,
            payload: Bytes::from(payload),
            properties: None,
        }))
    }

    #[test]
    fn test_route_publish() {
        let event = publish("frankensystem/sensor/supply_temperature/state", "21.5", false);

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived(message) => {
                assert_eq!(message.topic, "frankensystem/sensor/supply_temperature/state");
                assert_eq!(message.payload, Bytes::from("21.5"));
                assert!(!message.retain);
            }
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_route_retained_publish_keeps_flag() {
        let event = publish("a/b", "1", true);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::MessageReceived(InboundMessage { retain: true, .. })
        ));
    }

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_validate_subscription_success() {
        let granted = [
            SubscribeReasonCode::Success(QoS::AtLeastOnce),
            SubscribeReasonCode::Success(QoS::AtMostOnce),
        ];
        assert!(MessageHandler::validate_subscription_success(&granted).is_ok());

        let mixed = [
            SubscribeReasonCode::Success(QoS::AtLeastOnce),
            SubscribeReasonCode::NotAuthorized,
        ];
        assert!(MessageHandler::validate_subscription_success(&mixed).is_err());
        assert!(MessageHandler::validate_subscription_success(&[]).is_err());
    }

    #[test]
    fn test_validate_publish_acknowledgements() {
        assert!(MessageHandler::validate_publish_ack(&PubAckReason::Success).is_ok());
        assert!(
            MessageHandler::validate_publish_ack(&PubAckReason::NoMatchingSubscribers).is_ok()
        );
        assert!(MessageHandler::validate_publish_ack(&PubAckReason::NotAuthorized).is_err());
        assert!(MessageHandler::validate_publish_received(&PubRecReason::QuotaExceeded).is_err());
        assert!(MessageHandler::validate_publish_complete(&PubCompReason::Success).is_ok());
        assert!(MessageHandler::validate_publish_complete(
            &PubCompReason::PacketIdentifierNotFound
        )
        .is_err());
    }

    #[test]
    fn test_route_broker_disconnect() {
        let event = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::Disconnected
        );
    }
}
