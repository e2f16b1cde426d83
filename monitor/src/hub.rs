use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::model::{Device, TelemetryRecord};

pub type ConnId = Uuid;

/// Events pushed to live observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Outbound {
    DevicesSnapshot {
        devices: Vec<Device>,
    },
    Telemetry {
        device_id: String,
        record: TelemetryRecord,
    },
    History {
        device_id: String,
        records: Vec<TelemetryRecord>,
    },
}

type Sender = mpsc::UnboundedSender<Outbound>;

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnId, Sender>,
    subscribers: HashMap<String, HashMap<ConnId, Sender>>,
}

/// Fan-out hub mapping device ids to the live connections observing them.
/// Holds no history; delivery is best effort to currently connected
/// observers only. All locking stays behind these methods.
#[derive(Clone, Default)]
pub struct Hub {
    registry: Arc<RwLock<Registry>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer connection. The current device list is
    /// enqueued first so the observer has a coherent baseline before
    /// incremental updates arrive.
    pub async fn register(&self, snapshot: Vec<Device>) -> (ConnId, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        let _ = tx.send(Outbound::DevicesSnapshot { devices: snapshot });
        self.registry.write().await.connections.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Idempotent: subscribing twice has the same effect as once.
    /// Returns false for a connection the hub does not know.
    pub async fn subscribe(&self, conn_id: ConnId, device_id: &str) -> bool {
        let mut registry = self.registry.write().await;
        let Some(tx) = registry.connections.get(&conn_id).cloned() else {
            return false;
        };
        registry
            .subscribers
            .entry(device_id.to_owned())
            .or_default()
            .insert(conn_id, tx);
        true
    }

    pub async fn unsubscribe(&self, conn_id: ConnId, device_id: &str) {
        let mut registry = self.registry.write().await;
        if let Some(observers) = registry.subscribers.get_mut(device_id) {
            observers.remove(&conn_id);
            if observers.is_empty() {
                registry.subscribers.remove(device_id);
            }
        }
    }

    /// Blanket removal on disconnect: the connection leaves every
    /// subscriber set it was in.
    pub async fn disconnect(&self, conn_id: ConnId) {
        let mut registry = self.registry.write().await;
        registry.connections.remove(&conn_id);
        registry.subscribers.retain(|_, observers| {
            observers.remove(&conn_id);
            !observers.is_empty()
        });
    }

    /// Deliver one record to every current observer of its device. Zero
    /// subscribers is a no-op. Returns the number of deliveries.
    pub async fn publish(&self, record: &TelemetryRecord) -> usize {
        let registry = self.registry.read().await;
        let Some(observers) = registry.subscribers.get(&record.device_id) else {
            return 0;
        };
        let mut delivered = 0;
        for tx in observers.values() {
            let event = Outbound::Telemetry {
                device_id: record.device_id.clone(),
                record: record.clone(),
            };
            if tx.send(event).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Direct reply to a single connection, used for on-demand history
    /// pulls answered from storage.
    pub async fn send_to(&self, conn_id: ConnId, event: Outbound) -> bool {
        let registry = self.registry.read().await;
        registry
            .connections
            .get(&conn_id)
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(device_id: &str) -> TelemetryRecord {
        TelemetryRecord {
            device_id: device_id.to_owned(),
            timestamp: Utc::now(),
            temperature: Some(21.4),
            humidity: Some(48.2),
            cpu_usage: Some(12.0),
            memory_usage: Some(55.0),
            disk_usage: None,
            battery_level: None,
            signal_strength: None,
            raw: None,
        }
    }

    #[test]
    fn fan_out_reaches_only_subscribed_connections() {
        tokio_test::block_on(async {
            let hub = Hub::new();
            let (a, mut rx_a) = hub.register(Vec::new()).await;
            let (b, mut rx_b) = hub.register(Vec::new()).await;
            assert!(matches!(
                rx_a.recv().await,
                Some(Outbound::DevicesSnapshot { .. })
            ));
            assert!(matches!(
                rx_b.recv().await,
                Some(Outbound::DevicesSnapshot { .. })
            ));

            hub.subscribe(a, "dev-1").await;
            hub.subscribe(b, "dev-2").await;

            let delivered = hub.publish(&record("dev-1")).await;
            assert_eq!(delivered, 1);
            assert!(matches!(
                rx_a.recv().await,
                Some(Outbound::Telemetry { device_id, .. }) if device_id == "dev-1"
            ));
            assert!(rx_b.try_recv().is_err());
        });
    }

    #[test]
    fn duplicate_subscribe_delivers_once() {
        tokio_test::block_on(async {
            let hub = Hub::new();
            let (conn, mut rx) = hub.register(Vec::new()).await;
            rx.recv().await;

            hub.subscribe(conn, "dev-1").await;
            hub.subscribe(conn, "dev-1").await;

            assert_eq!(hub.publish(&record("dev-1")).await, 1);
            rx.recv().await;
            assert!(rx.try_recv().is_err());
        });
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        tokio_test::block_on(async {
            let hub = Hub::new();
            let (conn, mut rx) = hub.register(Vec::new()).await;
            rx.recv().await;

            hub.subscribe(conn, "dev-1").await;
            hub.unsubscribe(conn, "dev-1").await;

            assert_eq!(hub.publish(&record("dev-1")).await, 0);
            assert!(rx.try_recv().is_err());
        });
    }

    #[test]
    fn disconnect_removes_connection_from_every_set() {
        tokio_test::block_on(async {
            let hub = Hub::new();
            let (conn, mut rx) = hub.register(Vec::new()).await;
            rx.recv().await;

            hub.subscribe(conn, "dev-1").await;
            hub.subscribe(conn, "dev-2").await;
            hub.disconnect(conn).await;

            assert_eq!(hub.publish(&record("dev-1")).await, 0);
            assert_eq!(hub.publish(&record("dev-2")).await, 0);
            assert!(!hub.subscribe(conn, "dev-1").await);
        });
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        tokio_test::block_on(async {
            let hub = Hub::new();
            assert_eq!(hub.publish(&record("dev-9")).await, 0);
        });
    }
}
