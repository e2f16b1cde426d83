use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::errors::Result;
use crate::model::{Device, DeviceStats, TelemetryRecord};

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("database connection established");
    info!("running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("migrations completed");

    Ok(pool)
}

/// Atomic find-or-create keyed by device id: one conditional insert, safe
/// under concurrent first-writers for the same new device. `last_active`
/// only moves forward, so redelivered old records never rewind it.
pub async fn upsert_device(pool: &PgPool, device_id: &str, seen_at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO devices (device_id, name, device_type, status, owner, created_at, last_active)
        VALUES ($1, $2, 'virtual', 'active', 'system', $3, $3)
        ON CONFLICT (device_id)
        DO UPDATE SET last_active = GREATEST(devices.last_active, EXCLUDED.last_active)
        "#,
    )
    .bind(device_id)
    .bind(format!("Virtual Device {device_id}"))
    .bind(seen_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_device(pool: &PgPool, device_id: &str) -> Result<Option<Device>> {
    let device = sqlx::query_as::<_, Device>(
        r#"
        SELECT device_id, name, device_type, status, owner, created_at, last_active, metadata
        FROM devices
        WHERE device_id = $1
        "#,
    )
    .bind(device_id)
    .fetch_optional(pool)
    .await?;

    Ok(device)
}

pub async fn list_devices(pool: &PgPool) -> Result<Vec<Device>> {
    let devices = sqlx::query_as::<_, Device>(
        r#"
        SELECT device_id, name, device_type, status, owner, created_at, last_active, metadata
        FROM devices
        ORDER BY device_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(devices)
}

pub async fn insert_telemetry(pool: &PgPool, record: &TelemetryRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO telemetry (device_id, ts, temperature, humidity, cpu_usage,
                               memory_usage, disk_usage, battery_level, signal_strength, raw)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(&record.device_id)
    .bind(record.timestamp)
    .bind(record.temperature)
    .bind(record.humidity)
    .bind(record.cpu_usage)
    .bind(record.memory_usage)
    .bind(record.disk_usage)
    .bind(record.battery_level)
    .bind(record.signal_strength)
    .bind(&record.raw)
    .execute(pool)
    .await?;

    Ok(())
}

/// Newest-first window of one device's records.
pub async fn query_telemetry(
    pool: &PgPool,
    device_id: &str,
    since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<TelemetryRecord>> {
    let records = sqlx::query_as::<_, TelemetryRecord>(
        r#"
        SELECT device_id, ts AS timestamp, temperature, humidity, cpu_usage,
               memory_usage, disk_usage, battery_level, signal_strength, raw
        FROM telemetry
        WHERE device_id = $1 AND ts >= $2
        ORDER BY ts DESC
        LIMIT $3
        "#,
    )
    .bind(device_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

pub async fn aggregate_stats(
    pool: &PgPool,
    device_id: &str,
    since: DateTime<Utc>,
) -> Result<DeviceStats> {
    let stats = sqlx::query_as::<_, DeviceStats>(
        r#"
        SELECT COUNT(*) AS count,
               AVG(temperature)     AS avg_temperature,
               MIN(temperature)     AS min_temperature,
               MAX(temperature)     AS max_temperature,
               AVG(humidity)        AS avg_humidity,
               MIN(humidity)        AS min_humidity,
               MAX(humidity)        AS max_humidity,
               AVG(cpu_usage)       AS avg_cpu_usage,
               MIN(cpu_usage)       AS min_cpu_usage,
               MAX(cpu_usage)       AS max_cpu_usage,
               AVG(memory_usage)    AS avg_memory_usage,
               MIN(memory_usage)    AS min_memory_usage,
               MAX(memory_usage)    AS max_memory_usage,
               AVG(disk_usage)      AS avg_disk_usage,
               MIN(disk_usage)      AS min_disk_usage,
               MAX(disk_usage)      AS max_disk_usage,
               AVG(battery_level)   AS avg_battery_level,
               MIN(battery_level)   AS min_battery_level,
               MAX(battery_level)   AS max_battery_level,
               AVG(signal_strength) AS avg_signal_strength,
               MIN(signal_strength) AS min_signal_strength,
               MAX(signal_strength) AS max_signal_strength
        FROM telemetry
        WHERE device_id = $1 AND ts >= $2
        "#,
    )
    .bind(device_id)
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok(stats)
}
