mod broker;
mod device;
mod message;
mod sensors;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use broker::{BrokerClient, BrokerConfig};
use device::VirtualDevice;
use sensors::{SensorDataGenerator, SensorGenerator, WeatherSensorGenerator};

#[derive(Debug, Parser)]
#[command(name = "simulator", about = "Virtual IoT device fleet simulator")]
struct Args {
    /// MQTT broker host
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    password: Option<String>,

    /// Fixed topic all telemetry is published on
    #[arg(long, env = "TELEMETRY_TOPIC", default_value = "device_data")]
    topic: String,

    /// Number of standard virtual devices
    #[arg(long, env = "DEVICES", default_value_t = 3)]
    devices: usize,

    /// Number of additional weather-station devices
    #[arg(long, env = "WEATHER_DEVICES", default_value_t = 0)]
    weather_devices: usize,

    /// Seconds between telemetry samples per device
    #[arg(long, env = "INTERVAL_SECS", default_value_t = 5)]
    interval: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    info!("starting virtual device fleet");
    info!(
        "broker {}:{}, topic {}, devices {} (+{} weather), interval {}s",
        args.broker, args.port, args.topic, args.devices, args.weather_devices, args.interval
    );

    let broker = Arc::new(BrokerClient::new(BrokerConfig {
        host: args.broker,
        port: args.port,
        username: args.username,
        password: args.password,
        topic: args.topic,
    }));

    if !broker.connect().await {
        // Non-fatal: each runner retries through the publish path on its own tick.
        warn!("broker unavailable, devices will keep retrying on each publish");
    }

    let interval = Duration::from_secs(args.interval);
    let mut handles = Vec::new();
    let mut tasks = Vec::new();

    for i in 0..args.devices {
        let generator: Box<dyn SensorGenerator> = Box::new(SensorDataGenerator::new());
        let device = VirtualDevice::new(format!("VIRTUAL_{i:03}"), generator, Arc::clone(&broker));
        handles.push(device.handle());
        tasks.push(tokio::spawn(device.run(interval)));
    }
    for i in 0..args.weather_devices {
        let generator: Box<dyn SensorGenerator> = Box::new(WeatherSensorGenerator::new());
        let device = VirtualDevice::new(format!("WEATHER_{i:03}"), generator, Arc::clone(&broker));
        handles.push(device.handle());
        tasks.push(tokio::spawn(device.run(interval)));
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutdown signal received, stopping {} devices", handles.len());

    for handle in &handles {
        handle.stop();
    }
    for task in tasks {
        let _ = task.await;
    }
    info!("all devices stopped");
}
