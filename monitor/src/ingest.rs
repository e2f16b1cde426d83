use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::db;
use crate::hub::Hub;
use crate::metrics::{
    FANOUT_DELIVERIES_TOTAL, INGEST_LATENCY_SECONDS, PERSIST_FAILURES_TOTAL,
    RECORDS_PERSISTED_TOTAL,
};
use crate::model::TelemetryRecord;

/// The single ingest worker: drains the channel fed by the queue consumer
/// and runs every record through the shared ingestion path.
pub async fn run_ingest(mut rx: mpsc::Receiver<TelemetryRecord>, pool: PgPool, hub: Hub) {
    info!("ingestion consumer started");
    while let Some(record) = rx.recv().await {
        process_record(&pool, &hub, record).await;
    }
    info!("ingest channel closed, ingestion consumer stopped");
}

/// The one authoritative path from a parsed record to storage and live
/// fan-out, shared by the queue consumer and the HTTP ingestion route.
/// Persistence and broadcast are independent side effects: a failure in one
/// is logged and must not block the other.
pub async fn process_record(pool: &PgPool, hub: &Hub, record: TelemetryRecord) {
    let start = Instant::now();

    if let Err(e) = db::upsert_device(pool, &record.device_id, record.timestamp).await {
        error!(device_id = %record.device_id, "device upsert failed: {e}");
    }

    match db::insert_telemetry(pool, &record).await {
        Ok(()) => {
            RECORDS_PERSISTED_TOTAL.inc();
            INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        }
        Err(e) => {
            PERSIST_FAILURES_TOTAL.inc();
            error!(
                device_id = %record.device_id,
                "telemetry persist failed, record lost for durability: {e}"
            );
        }
    }

    let delivered = hub.publish(&record).await;
    if delivered > 0 {
        FANOUT_DELIVERIES_TOTAL.inc_by(delivered as f64);
    }
    debug!(device_id = %record.device_id, delivered, "record fanned out");
}
