//! Redis COV 最后记录值缓存
//!
//! 键：`cov:point:{point_id}:last`，值为 JSON `{"value": .., "ts_ms": ..}`，可选 TTL。
//! 进程重启后仍保留，避免重启时所有点位按冷启动重复记录。

use crate::error::StorageError;
use crate::models::CachedValue;
use crate::traits::LastValueCache;
use redis::AsyncCommands;

fn last_value_key(point_id: i64) -> String {
    format!("cov:point:{}:last", point_id)
}

/// Redis COV 缓存
pub struct RedisLastValueCache {
    client: redis::Client,
    ttl_seconds: Option<u64>,
}

impl RedisLastValueCache {
    pub fn new(client: redis::Client, ttl_seconds: Option<u64>) -> Self {
        Self {
            client,
            ttl_seconds: ttl_seconds.filter(|ttl| *ttl > 0),
        }
    }

    pub fn connect(redis_url: &str, ttl_seconds: Option<u64>) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self::new(client, ttl_seconds))
    }
}

#[async_trait::async_trait]
impl LastValueCache for RedisLastValueCache {
    async fn get(&self, point_id: i64) -> Result<Option<CachedValue>, StorageError> {
        let mut connection = self.client.get_multiplexed_tokio_connection().await?;
        let data: Option<String> = connection.get(last_value_key(point_id)).await?;
        let Some(data) = data else {
            return Ok(None);
        };
        let payload: CachedValue = serde_json::from_str(&data)?;
        Ok(Some(payload))
    }

    async fn set(&self, point_id: i64, value: f64, ts_ms: i64) -> Result<(), StorageError> {
        let mut connection = self.client.get_multiplexed_tokio_connection().await?;
        let data = serde_json::to_string(&CachedValue { value, ts_ms })?;
        let key = last_value_key(point_id);
        if let Some(ttl) = self.ttl_seconds {
            connection.set_ex::<_, _, ()>(key, data, ttl).await?;
        } else {
            connection.set::<_, _, ()>(key, data).await?;
        }
        Ok(())
    }
}
