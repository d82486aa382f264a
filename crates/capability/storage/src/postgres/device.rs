//! Postgres 设备存储实现
//!
//! 设备表由外部设备管理模块维护，采集链路只读取，并在轮询失败/恢复时更新 `status`。

use crate::error::StorageError;
use crate::traits::DeviceStore;
use domain::{Device, DeviceStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;

const DEVICE_COLUMNS: &str = "d.device_id, d.name, d.protocol, d.polling_interval_ms, \
     d.logging_mode, d.status, d.config::text as config";

pub struct PgDeviceStore {
    pub pool: PgPool,
}

impl PgDeviceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(
            database_url,
            crate::connection::DEFAULT_MAX_CONNECTIONS,
        )
        .await?;
        Ok(Self { pool })
    }
}

/// 行转设备；文本枚举或配置非法时返回错误
fn device_from_row(row: &PgRow) -> Result<Device, StorageError> {
    let protocol: String = row.try_get("protocol")?;
    let logging_mode: Option<String> = row.try_get("logging_mode")?;
    let status: Option<String> = row.try_get("status")?;
    let polling_interval_ms: Option<i64> = row.try_get("polling_interval_ms")?;
    let config: Option<String> = row.try_get("config")?;
    Ok(Device {
        device_id: row.try_get("device_id")?,
        name: row.try_get("name")?,
        protocol: protocol
            .parse()
            .map_err(|e: domain::ParseError| StorageError::new(e.to_string()))?,
        polling_interval_ms: polling_interval_ms.and_then(|ms| u64::try_from(ms).ok()),
        logging_mode: logging_mode
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|e: domain::ParseError| StorageError::new(e.to_string()))?,
        status: match status.as_deref() {
            Some(value) => value
                .parse()
                .map_err(|e: domain::ParseError| StorageError::new(e.to_string()))?,
            None => DeviceStatus::default(),
        },
        config: match config {
            Some(text) => serde_json::from_str(&text)?,
            None => serde_json::Value::Null,
        },
    })
}

/// SQL 只排除字面值 `failed`，`error`/`FAILED` 等别名在解析后才能识别，这里再按解析结果过滤。
/// 单个设备元数据错误不影响其他设备调度。
fn keep_pollable(device_id: Option<i64>, parsed: Result<Device, StorageError>) -> Option<Device> {
    match parsed {
        Ok(device) if device.status.is_schedulable() => Some(device),
        Ok(_) => None,
        Err(err) => {
            warn!(
                target: "ems.storage",
                device_id = ?device_id,
                error = %err,
                "device_row_skipped"
            );
            None
        }
    }
}

#[async_trait::async_trait]
impl DeviceStore for PgDeviceStore {
    async fn list_pollable_devices(&self) -> Result<Vec<Device>, StorageError> {
        let sql = format!(
            "select {DEVICE_COLUMNS} from devices d \
             where coalesce(d.status, 'online') <> 'failed' \
             and exists (select 1 from points p \
                         where p.device_id = d.device_id and p.is_history_enabled) \
             order by d.device_id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let devices = rows
            .iter()
            .filter_map(|row| {
                let device_id: Option<i64> = row.try_get("device_id").ok();
                keep_pollable(device_id, device_from_row(row))
            })
            .collect();
        Ok(devices)
    }

    async fn find_device(&self, device_id: i64) -> Result<Option<Device>, StorageError> {
        let sql = format!("select {DEVICE_COLUMNS} from devices d where d.device_id = $1");
        let row = sqlx::query(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(device_from_row(&row)?))
    }

    async fn set_device_status(
        &self,
        device_id: i64,
        status: DeviceStatus,
    ) -> Result<(), StorageError> {
        sqlx::query("update devices set status = $2, updated_at = now() where device_id = $1")
            .bind(device_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
