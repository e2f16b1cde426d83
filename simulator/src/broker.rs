use std::future::Future;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::message::TelemetryMessage;

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Publish seam so device runners can be exercised without a live broker.
pub trait Publisher: Send + Sync {
    fn publish(&self, message: &TelemetryMessage) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
}

/// Publish-side broker client. A missing session is a valid, checked state:
/// `connect` reports it as `false` after the retry budget is spent, and
/// `publish` attempts a single reconnect before giving up on a message.
pub struct BrokerClient {
    cfg: BrokerConfig,
    session: Mutex<Option<AsyncClient>>,
}

impl BrokerClient {
    pub fn new(cfg: BrokerConfig) -> Self {
        Self {
            cfg,
            session: Mutex::new(None),
        }
    }

    /// Establish a broker session, retrying a bounded number of times with a
    /// fixed delay. Returns `false` once the budget is exhausted.
    pub async fn connect(&self) -> bool {
        for attempt in 1..=CONNECT_ATTEMPTS {
            info!(
                attempt,
                "connecting to broker at {}:{}", self.cfg.host, self.cfg.port
            );
            if let Some(client) = open_session(&self.cfg).await {
                *self.session.lock().await = Some(client);
                info!("broker connection established");
                return true;
            }
            if attempt < CONNECT_ATTEMPTS {
                warn!(
                    "broker connect attempt {}/{} failed, retrying in {:?}",
                    attempt, CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY
                );
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
        error!(
            "broker unreachable after {} attempts, no session available",
            CONNECT_ATTEMPTS
        );
        false
    }

    async fn publish_message(&self, message: &TelemetryMessage) -> bool {
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!(device_id = %message.device_id, "failed to serialize telemetry: {e}");
                return false;
            }
        };

        let client = {
            let mut session = self.session.lock().await;
            match session.as_ref() {
                Some(client) => client.clone(),
                None => {
                    // One transparent reconnect before the message is given up on.
                    match open_session(&self.cfg).await {
                        Some(client) => {
                            *session = Some(client.clone());
                            client
                        }
                        None => {
                            warn!(
                                device_id = %message.device_id,
                                "no broker session, dropping telemetry sample"
                            );
                            return false;
                        }
                    }
                }
            }
        };

        match client
            .publish(&self.cfg.topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(device_id = %message.device_id, "failed to publish: {e}");
                false
            }
        }
    }
}

impl Publisher for BrokerClient {
    fn publish(&self, message: &TelemetryMessage) -> impl Future<Output = bool> + Send {
        self.publish_message(message)
    }
}

/// Open one MQTT session and wait for the broker's CONNACK. On success the
/// event loop is handed to a background driver task that keeps the session
/// alive and re-polls through transient errors.
async fn open_session(cfg: &BrokerConfig) -> Option<AsyncClient> {
    let client_id = format!("sim-{}", Uuid::new_v4());
    let mut options = MqttOptions::new(client_id, &cfg.host, cfg.port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(true);
    if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 1024);

    let handshake = tokio::time::timeout(CONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return true,
                Ok(_) => {}
                Err(e) => {
                    warn!("broker handshake failed: {e}");
                    return false;
                }
            }
        }
    })
    .await;

    match handshake {
        Ok(true) => {
            tokio::spawn(async move {
                loop {
                    if let Err(e) = eventloop.poll().await {
                        error!("mqtt eventloop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            });
            Some(client)
        }
        Ok(false) => None,
        Err(_) => {
            warn!("broker handshake timed out");
            None
        }
    }
}
