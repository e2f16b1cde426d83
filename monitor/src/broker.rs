use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::{Error, Result};
use crate::metrics::{MALFORMED_MESSAGES_TOTAL, MESSAGES_TOTAL};
use crate::model::{TelemetryEnvelope, TelemetryRecord};

pub const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub client_id: String,
}

/// Drain the queue for the lifetime of the process. Each inbound payload is
/// parsed and forwarded to the ingest channel; malformed payloads are
/// counted and dropped without stopping the loop. Returns only when the
/// broker is unavailable after the connect retry budget or the ingest side
/// has gone away.
pub async fn run_consumer(cfg: BrokerConfig, tx: mpsc::Sender<TelemetryRecord>) -> Result<()> {
    let (client, mut eventloop) = connect(&cfg).await?;

    client.subscribe(&cfg.topic, QoS::AtLeastOnce).await?;
    info!("subscribed to {} with QoS 1", cfg.topic);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                MESSAGES_TOTAL.inc();
                debug!(
                    topic = %publish.topic,
                    size = publish.payload.len(),
                    "message received"
                );

                match TelemetryEnvelope::parse(&publish.payload) {
                    Ok(record) => {
                        if tx.send(record).await.is_err() {
                            error!("ingest channel closed, stopping consumer");
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        MALFORMED_MESSAGES_TOTAL.inc();
                        warn!("dropping malformed message: {e}");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                // The event loop re-establishes the session on the next poll.
                error!("mqtt connection error: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Bounded connect: a fixed number of attempts with a fixed delay between
/// them. Exhaustion is reported as a checked unavailable condition, never a
/// panic.
pub async fn connect(cfg: &BrokerConfig) -> Result<(AsyncClient, EventLoop)> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        info!(
            "connecting to broker at {}:{} (attempt {}/{})",
            cfg.host, cfg.port, attempt, CONNECT_ATTEMPTS
        );
        match open_session(cfg).await {
            Ok(session) => {
                info!("broker session established");
                return Ok(session);
            }
            Err(e) => {
                warn!("broker connect attempt {attempt} failed: {e}");
                if attempt < CONNECT_ATTEMPTS {
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(Error::BrokerUnavailable(CONNECT_ATTEMPTS))
}

async fn open_session(cfg: &BrokerConfig) -> Result<(AsyncClient, EventLoop)> {
    let mut options = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
    options.set_keep_alive(Duration::from_secs(30));
    // Persistent session: the broker holds QoS 1 messages while we are away.
    options.set_clean_session(false);
    if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 10_000);

    let handshake = tokio::time::timeout(CONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(Error::Connection(e)),
            }
        }
    })
    .await;

    match handshake {
        Ok(Ok(())) => Ok((client, eventloop)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::HandshakeTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_reports_unavailable_after_bounded_retries() {
        tokio_test::block_on(async {
            let cfg = BrokerConfig {
                host: "127.0.0.1".into(),
                port: 1,
                username: None,
                password: None,
                topic: "device_data".into(),
                client_id: "test-monitor".into(),
            };

            match connect(&cfg).await {
                Err(Error::BrokerUnavailable(attempts)) => {
                    assert_eq!(attempts, CONNECT_ATTEMPTS);
                }
                Err(other) => panic!("unexpected error: {other}"),
                Ok(_) => panic!("connect should not succeed against a dead endpoint"),
            }
        });
    }
}
