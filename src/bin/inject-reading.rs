//! Sensor reading injection utility
//!
//! Publishes one raw temperature or humidity reading on a sensor's inbound
//! topic, for exercising a running controller without real hardware.
//!
//! ## Usage
//!
//! ```bash
//! # 24.5 C at the mixed air sensor
//! inject-reading --location mixed_air --kind temperature --value 24.5
//!
//! # Humidity at the supply sensor on a remote broker, retained
//! inject-reading --location supply --kind humidity --value 48 --broker-url mqtt://broker:1883 --retain
//!
//! # Deliberately malformed payload
//! inject-reading --location return --kind temperature --raw "not-a-number"
//! ```

use bytes::Bytes;
use clap::{Parser, ValueEnum};
use dewpoint_controller::config::MqttSection;
use dewpoint_controller::sensors::{encode_value, Location, SensorTopics};
use dewpoint_controller::transport::{BrokerHandle, MqttBroker, QoS};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Temperature,
    Humidity,
}

#[derive(Parser)]
#[command(
    name = "inject-reading",
    about = "Publish a raw sensor reading to the MQTT broker"
)]
struct Args {
    /// Sensor location (mixed_air, post_coil, return, supply)
    #[arg(long)]
    location: Location,

    /// Which reading to publish
    #[arg(long, value_enum)]
    kind: Kind,

    /// Reading value (degrees Celsius or percent relative humidity)
    #[arg(long, required_unless_present = "raw", allow_negative_numbers = true)]
    value: Option<f64>,

    /// Publish this payload verbatim instead of a formatted value
    #[arg(long, conflicts_with = "value")]
    raw: Option<String>,

    /// Topic prefix the controller listens under
    #[arg(long, default_value = "frankensystem")]
    prefix: String,

    /// MQTT broker URL
    #[arg(long, default_value = "mqtt://127.0.0.1:1883")]
    broker_url: String,

    /// Set the retain flag
    #[arg(long)]
    retain: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let topics = SensorTopics::new(&args.prefix, args.location);
    let topic = match args.kind {
        Kind::Temperature => topics.temperature,
        Kind::Humidity => topics.humidity,
    };
    let payload = match (&args.raw, args.value) {
        (Some(raw), _) => raw.clone(),
        (None, Some(value)) => encode_value(value),
        (None, None) => {
            eprintln!("✗ Either --value or --raw is required");
            std::process::exit(1);
        }
    };

    let config = MqttSection {
        broker_url: args.broker_url.clone(),
        client_id: format!("inject-reading-{}", Uuid::new_v4().simple()),
        ..MqttSection::default()
    };
    let broker = MqttBroker::new(config)?;

    println!("Connecting to MQTT broker {}...", args.broker_url);
    if let Err(e) = broker.connect(true).await {
        eprintln!("✗ Failed to connect: {e}");
        std::process::exit(1);
    }

    println!("📤 {topic} <- {payload}");
    if let Err(e) = broker
        .publish(&topic, Bytes::from(payload), QoS::AtLeastOnce, args.retain)
        .await
    {
        eprintln!("✗ Failed to publish reading: {e}");
        std::process::exit(1);
    }

    // publish resolves on PubAck, so the reading has reached the broker
    broker.shutdown().await?;

    println!("✓ Reading injected");
    Ok(())
}
