//! Postgres 读数写入

use crate::error::StorageError;
use crate::traits::TelemetryWriter;
use domain::CanonicalMetric;
use sqlx::PgPool;

pub struct PgTelemetryWriter {
    pub pool: PgPool,
}

impl PgTelemetryWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TelemetryWriter for PgTelemetryWriter {
    async fn write_readings(&self, readings: &[CanonicalMetric]) -> Result<usize, StorageError> {
        if readings.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        let mut tx = self.pool.begin().await?;
        for reading in readings {
            let (Some(device), Some(ts_ms)) = (reading.device.as_ref(), reading.ts_ms) else {
                continue;
            };
            // 设备按编码解析；未登记的设备不插入任何行。
            let result = sqlx::query(
                "insert into telemetry_history \
                 (fecha, voltaje, corriente, potencia, company_id, device_id, created_at) \
                 select to_timestamp($2 / 1000.0)::date, $3, $4, $5, d.company_id, d.id, \
                 to_timestamp($2 / 1000.0) \
                 from devices d where d.code = $1 or d.id::text = $1 \
                 limit 1",
            )
            .bind(device)
            .bind(ts_ms as f64)
            .bind(reading.voltage)
            .bind(reading.current)
            .bind(reading.active_power)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(written)
    }
}
