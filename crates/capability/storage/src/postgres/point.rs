//! Postgres 点位存储实现

use crate::error::StorageError;
use crate::models::ProvisionedPoint;
use crate::traits::PointStore;
use domain::Point;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

pub struct PgPointStore {
    pub pool: PgPool,
}

impl PgPointStore {
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

fn point_from_row(row: &PgRow) -> Result<Point, StorageError> {
    let object_instance: Option<i64> = row.try_get("object_instance")?;
    let register_address: Option<i32> = row.try_get("register_address")?;
    let config: Option<String> = row.try_get("config")?;
    Ok(Point {
        point_id: row.try_get("point_id")?,
        device_id: row.try_get("device_id")?,
        name: row.try_get("name")?,
        object_type: row.try_get("object_type")?,
        object_instance: object_instance.and_then(|v| u32::try_from(v).ok()),
        register_type: row.try_get("register_type")?,
        register_address: register_address.and_then(|v| u16::try_from(v).ok()),
        config: match config {
            Some(text) => serde_json::from_str(&text)?,
            None => serde_json::Value::Null,
        },
        is_monitor: row.try_get("is_monitor")?,
        is_history_enabled: row.try_get("is_history_enabled")?,
        table_name: row.try_get("table_name")?,
    })
}

#[async_trait::async_trait]
impl PointStore for PgPointStore {
    async fn list_points(&self, device_id: i64) -> Result<Vec<Point>, StorageError> {
        let rows = sqlx::query(
            "select point_id, device_id, name, object_type, object_instance, \
             register_type, register_address, config::text as config, \
             is_monitor, is_history_enabled, table_name \
             from points where device_id = $1 order by point_id",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        let mut points = Vec::with_capacity(rows.len());
        for row in &rows {
            points.push(point_from_row(row)?);
        }
        Ok(points)
    }

    async fn set_point_table(
        &self,
        point_id: i64,
        table_name: Option<&str>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "update points set table_name = $2, updated_at = now() where point_id = $1",
        )
        .bind(point_id)
        .bind(table_name)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::new(format!("point {} not found", point_id)));
        }
        Ok(())
    }

    async fn list_provisioned_points(&self) -> Result<Vec<ProvisionedPoint>, StorageError> {
        let rows = sqlx::query(
            "select p.point_id, d.name as device_name, p.name as point_name, p.table_name \
             from points p join devices d on d.device_id = p.device_id \
             where p.table_name is not null \
             order by p.point_id",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            points.push(ProvisionedPoint {
                point_id: row.try_get("point_id")?,
                device_name: row.try_get("device_name")?,
                point_name: row.try_get("point_name")?,
                table_name: row.try_get("table_name")?,
            });
        }
        Ok(points)
    }
}
