//! Relay commands
//!
//! The controller drives three relays: two dehumidification stages and a
//! humidifier. Commands are plain strings (`toggle`, `on`, `off`) published
//! at least once, never retained, to `{prefix}/relays/{relay}/command`.

use crate::error::{ControllerError, ControllerResult};
use crate::transport::{QoS, TopicClient};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub const RELAY_QOS: QoS = QoS::AtLeastOnce;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relay {
    Dehumidification1,
    Dehumidification2,
    Humidification,
}

impl Relay {
    pub fn all() -> &'static [Relay] {
        &[
            Relay::Dehumidification1,
            Relay::Dehumidification2,
            Relay::Humidification,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Relay::Dehumidification1 => "dehumidification_1",
            Relay::Dehumidification2 => "dehumidification_2",
            Relay::Humidification => "humidification",
        }
    }

    /// Command topic under `prefix`, dropping a trailing `/`
    pub fn command_topic(&self, prefix: &str) -> String {
        let prefix = prefix.strip_suffix('/').unwrap_or(prefix);
        format!("{prefix}/relays/{self}/command")
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Relay::all()
            .iter()
            .copied()
            .find(|relay| relay.as_str() == s)
            .ok_or_else(|| format!("Unknown relay '{s}'"))
    }
}

/// State change requested from a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    /// Flip the relay based on its current state
    Toggle,
    On,
    Off,
}

impl RelayCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayCommand::Toggle => "toggle",
            RelayCommand::On => "on",
            RelayCommand::Off => "off",
        }
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "toggle" => Ok(RelayCommand::Toggle),
            "on" => Ok(RelayCommand::On),
            "off" => Ok(RelayCommand::Off),
            other => Err(format!("Unknown relay command '{other}'")),
        }
    }
}

/// Publishes relay commands through a [`TopicClient`]
pub struct RelayClient<C: TopicClient> {
    client: Arc<C>,
    prefix: String,
}

impl<C: TopicClient> RelayClient<C> {
    pub fn new(client: Arc<C>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub async fn set(&self, relay: Relay, command: RelayCommand) -> ControllerResult<()> {
        let topic = relay.command_topic(&self.prefix);
        self.client
            .publish(
                &topic,
                Bytes::from_static(command.as_str().as_bytes()),
                RELAY_QOS,
                false,
            )
            .await
            .map_err(|e| ControllerError::publish(topic.as_str(), e))?;

        info!(%relay, %command, topic = %topic, "Relay command sent");
        Ok(())
    }

    pub async fn toggle(&self, relay: Relay) -> ControllerResult<()> {
        self.set(relay, RelayCommand::Toggle).await
    }

    pub async fn on(&self, relay: Relay) -> ControllerResult<()> {
        self.set(relay, RelayCommand::On).await
    }

    pub async fn off(&self, relay: Relay) -> ControllerResult<()> {
        self.set(relay, RelayCommand::Off).await
    }
}
