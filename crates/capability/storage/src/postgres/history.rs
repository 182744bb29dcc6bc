//! Postgres 历史序列读取

use crate::error::StorageError;
use crate::models::TimeRange;
use crate::traits::HistorySource;
use domain::HistorySample;
use sqlx::{PgPool, Row};

pub struct PgHistorySource {
    pub pool: PgPool,
}

impl PgHistorySource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn device_exists(&self, device: &str) -> Result<bool, StorageError> {
        let row = sqlx::query("select 1 from devices where code = $1 or id::text = $1 limit 1")
            .bind(device)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait::async_trait]
impl HistorySource for PgHistorySource {
    async fn fetch_series(
        &self,
        device: Option<&str>,
        range: TimeRange,
    ) -> Result<Vec<HistorySample>, StorageError> {
        if let Some(device) = device {
            if !self.device_exists(device).await? {
                return Err(StorageError::DeviceNotFound(device.to_string()));
            }
        }

        let rows = sqlx::query(
            "select (extract(epoch from th.created_at) * 1000)::bigint as ts_ms, \
             coalesce(d.code, d.id::text, 'UNKNOWN') as device, \
             th.voltaje::double precision as vrms, \
             th.corriente::double precision as irms, \
             (th.voltaje * th.corriente)::double precision as s_apparent_va, \
             th.potencia::double precision as potencia_activa, \
             case when th.voltaje > 0 and th.corriente > 0 \
               then (th.potencia / (th.voltaje * th.corriente))::double precision \
               else null end as factor_potencia \
             from telemetry_history th \
             left join devices d on th.device_id = d.id \
             where th.created_at >= to_timestamp($1 / 1000.0) \
             and th.created_at <= to_timestamp($2 / 1000.0) \
             and ($3::text is null or d.code = $3 or d.id::text = $3 or th.device_id::text = $3) \
             order by th.created_at asc",
        )
        .bind(range.start_ms as f64)
        .bind(range.end_ms as f64)
        .bind(device)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(HistorySample {
                ts_ms: row.try_get("ts_ms")?,
                device: row.try_get("device")?,
                voltage: row.try_get("vrms")?,
                current: row.try_get("irms")?,
                apparent_power: row.try_get("s_apparent_va")?,
                active_power: row.try_get("potencia_activa")?,
                power_factor: row.try_get("factor_potencia")?,
            });
        }
        Ok(items)
    }
}
